//! Shared test doubles for the runtime

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sphere_agents::{CompletionRequest, ProviderError, ProviderGateway};
use sphere_core::{Persona, PersonaSet};

pub fn persona_set(roles: &[&str]) -> PersonaSet {
    let personas = roles
        .iter()
        .map(|role| Persona::new(role, &format!("Think like a {}.", role)))
        .collect();
    PersonaSet::new("Test Set", personas)
}

/// Gateway whose behavior is scripted per persona role.
///
/// Agent calls are recognised by their system prompt; anything else is
/// treated as the synthesis call.
#[derive(Default)]
pub struct RoleScriptedBackend {
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, ProviderError>>,
    panics: Mutex<HashSet<String>>,
    synthesis_failure: Mutex<Option<ProviderError>>,
    synthesis_prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RoleScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delay(&self, role: &str, delay: Duration) {
        self.delays.lock().insert(role.to_string(), delay);
    }

    pub fn fail(&self, role: &str, error: ProviderError) {
        self.failures.lock().insert(role.to_string(), error);
    }

    pub fn panic_on(&self, role: &str) {
        self.panics.lock().insert(role.to_string());
    }

    pub fn fail_synthesis(&self, error: ProviderError) {
        *self.synthesis_failure.lock() = Some(error);
    }

    /// Agent calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn synthesis_prompts(&self) -> Vec<String> {
        self.synthesis_prompts.lock().clone()
    }

    fn role_of(request: &CompletionRequest) -> Option<String> {
        let system = request.system_prompt()?;
        let rest = system.strip_prefix("You are the ")?;
        let (role, _) = rest.split_once(" agent in ")?;
        Some(role.to_string())
    }
}

#[async_trait]
impl ProviderGateway for RoleScriptedBackend {
    async fn send(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let Some(role) = Self::role_of(request) else {
            self.synthesis_prompts
                .lock()
                .push(request.prompt().unwrap_or_default().to_string());
            return match self.synthesis_failure.lock().clone() {
                Some(error) => Err(error),
                None => Ok("Synthesized analysis".to_string()),
            };
        };

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if self.panics.lock().contains(&role) {
            panic!("scripted panic for {}", role);
        }

        let delay = self.delays.lock().get(&role).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.failures.lock().get(&role).cloned() {
            Some(error) => Err(error),
            None => Ok(format!("{} insight", role)),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "Mock"
    }
}
