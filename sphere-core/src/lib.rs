//! Sphere Core - run data model for multi-agent analysis
//!
//! This crate provides the foundational types:
//! - Personas and ordered persona sets
//! - Agent results, analysis runs and their lifecycle status
//! - The lock-serialized audit trail
//! - The canonical report document (render + parse)
//! - Run-level cancellation

pub mod persona;
pub mod run;
pub mod audit;
pub mod report;
pub mod cancel;

pub use persona::*;
pub use run::*;
pub use audit::*;
pub use report::*;
pub use cancel::*;

/// Default store directory name under the user's home
pub const DEFAULT_STORE_DIR: &str = ".sphere";
