//! Filesystem traversal and hashing.

pub mod walker;
