//! Utility modules for the site agent.

pub mod errors;

pub use errors::{AgentError, Result};
