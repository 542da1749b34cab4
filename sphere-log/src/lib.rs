//! Sphere Log
//!
//! Persists analysis reports into a local git repository:
//! - Async `git` subprocess wrapper
//! - Cross-process store lock
//! - The single-writer [`LogStore`] with history queries

pub mod git;
pub mod lock;
pub mod store;

pub use git::*;
pub use lock::*;
pub use store::*;
