//! Site agent library
//!
//! Reports content checksums, bundles changed files and applies restore
//! steps for sites whose content lives on a local filesystem.

pub mod bundle;
pub mod fs;
pub mod site;
pub mod utils;

// Re-export commonly used types
pub use site::LocalSiteAgent;
pub use utils::{AgentError, Result};
