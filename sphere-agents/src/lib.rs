//! Sphere Agents
//!
//! Everything that talks to a language model:
//! - **Gateway**: one trait over OpenAI-compatible and Anthropic backends
//! - **Presets**: known providers with default endpoints and models
//! - **Retry**: backoff and per-attempt timeouts for transient failures
//! - **Runner**: one persona in, one agent result out
//! - **Synthesizer**: merges successful perspectives into a final analysis
//!
//! ## Persona Sets
//!
//! Persona sets are defined via TOML files in `prompts/`.
//! See [`persona::PersonaRegistry`] for loading and managing them.

pub mod gateway;
pub mod presets;
pub mod retry;
pub mod persona;
pub mod runner;
pub mod synthesizer;

pub use gateway::*;
pub use presets::*;
pub use retry::*;
pub use persona::*;
pub use runner::*;
pub use synthesizer::*;
