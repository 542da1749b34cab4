//! Sphere Runtime
//!
//! Drives an analysis end to end:
//! - **Orchestrator**: bounded fan-out of persona runners, ordered fan-in
//! - **Pipeline**: orchestration, synthesis and persistence for one query
//! - **Config**: the knobs a run needs, bundled

pub mod config;
pub mod orchestrator;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use config::*;
pub use orchestrator::*;
pub use pipeline::*;
