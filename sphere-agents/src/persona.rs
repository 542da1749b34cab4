//! Persona set management
//!
//! Loads persona sets from TOML files, enabling easy customization of the
//! roles that take part in an analysis. Each file defines one ordered set;
//! the order of `[[agents]]` tables is the canonical result order.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use sphere_core::{Persona, PersonaSet};

/// Id of the set used when none is selected
pub const DEFAULT_PERSONA_SET: &str = "general";

/// A persona set definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaSetFile {
    pub persona_set: PersonaSetMetadata,
    #[serde(default)]
    pub agents: Vec<Persona>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaSetMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PersonaSetFile {
    /// Build the ordered, position-stamped set
    pub fn to_set(&self) -> PersonaSet {
        PersonaSet::new(&self.persona_set.name, self.agents.clone())
    }
}

/// Registry of all loaded persona sets
#[derive(Debug, Default)]
pub struct PersonaRegistry {
    sets: BTreeMap<String, PersonaSetFile>,
}

impl PersonaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persona sets shipped with the binary
    pub fn load_embedded() -> Self {
        let mut registry = Self::new();

        let embedded = [
            include_str!("../prompts/general.toml"),
            include_str!("../prompts/decision.toml"),
        ];

        for toml_str in embedded {
            match toml::from_str::<PersonaSetFile>(toml_str) {
                Ok(set) if set.persona_set.enabled => registry.register(set),
                Ok(_) => {}
                Err(e) => warn!("Skipping embedded persona set: {}", e),
            }
        }

        registry
    }

    /// Load persona sets from a directory of `*.toml` files
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let mut registry = Self::new();
        registry.extend_from_dir(dir)?;
        Ok(registry)
    }

    /// Add sets from a directory, replacing embedded sets with the same id
    pub fn extend_from_dir<P: AsRef<Path>>(&mut self, dir: P) -> std::io::Result<usize> {
        let mut loaded = 0;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                match toml::from_str::<PersonaSetFile>(&content) {
                    Ok(set) if set.persona_set.enabled => {
                        self.register(set);
                        loaded += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping persona file {}: {}", path.display(), e),
                }
            }
        }

        Ok(loaded)
    }

    /// Register a persona set
    pub fn register(&mut self, set: PersonaSetFile) {
        self.sets.insert(set.persona_set.id.clone(), set);
    }

    /// Get a persona set by id
    pub fn get(&self, id: &str) -> Option<PersonaSet> {
        self.sets.get(id).map(PersonaSetFile::to_set)
    }

    /// Raw definition, for display
    pub fn definition(&self, id: &str) -> Option<&PersonaSetFile> {
        self.sets.get(id)
    }

    /// List all set ids, sorted
    pub fn list_ids(&self) -> Vec<&str> {
        self.sets.keys().map(|s| s.as_str()).collect()
    }

    /// Count of loaded sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
