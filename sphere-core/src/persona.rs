//! Persona data model
//!
//! A persona is one analytical role in an ordered set. The position of a
//! persona inside its set is fixed when the set is built and is what keeps
//! agent results in canonical order.

use serde::{Deserialize, Serialize};

/// A single analytical role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Role name (e.g. "Skeptic")
    pub role: String,
    /// Short description of the angle this role takes
    #[serde(default)]
    pub perspective: String,
    /// Role instruction folded into the system prompt
    pub prompt: String,
    /// Index inside the owning persona set
    #[serde(skip)]
    pub position: usize,
}

impl Persona {
    pub fn new(role: &str, prompt: &str) -> Self {
        Self {
            role: role.to_string(),
            perspective: String::new(),
            prompt: prompt.to_string(),
            position: 0,
        }
    }

    pub fn with_perspective(mut self, perspective: &str) -> Self {
        self.perspective = perspective.to_string();
        self
    }
}

/// An ordered, immutable set of personas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSet {
    name: String,
    personas: Vec<Persona>,
}

impl PersonaSet {
    /// Build a set, stamping each persona with its position
    pub fn new(name: &str, personas: Vec<Persona>) -> Self {
        let personas = personas
            .into_iter()
            .enumerate()
            .map(|(position, mut persona)| {
                persona.position = position;
                persona
            })
            .collect();

        Self {
            name: name.to_string(),
            personas,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Case-insensitive lookup by role name
    pub fn find_role(&self, role: &str) -> Option<&Persona> {
        self.personas
            .iter()
            .find(|p| p.role.eq_ignore_ascii_case(role))
    }

    /// Keep only the first `max` personas
    pub fn limited(mut self, max: usize) -> Self {
        self.personas.truncate(max);
        self
    }

    pub fn roles(&self) -> Vec<&str> {
        self.personas.iter().map(|p| p.role.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersonaSet {
        PersonaSet::new(
            "sample",
            vec![
                Persona::new("Rationalist", "Be logical."),
                Persona::new("Skeptic", "Question everything."),
                Persona::new("Historian", "Give precedent."),
            ],
        )
    }

    #[test]
    fn test_positions_follow_insertion_order() {
        let set = sample();
        let positions: Vec<usize> = set.personas().iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_find_role_ignores_case() {
        let set = sample();
        assert_eq!(set.find_role("skeptic").map(|p| p.position), Some(1));
        assert!(set.find_role("Futurist").is_none());
    }

    #[test]
    fn test_limited() {
        let set = sample().limited(2);
        assert_eq!(set.roles(), vec!["Rationalist", "Skeptic"]);
    }
}
