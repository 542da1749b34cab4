//! Agent Orchestrator
//!
//! Fans one query out to every persona of a set:
//! - One spawned task per persona, gated by a semaphore
//! - Results collected as they finish, stored at the persona's index
//! - A panicking or failing agent never aborts its siblings
//! - Run status computed once every task has joined

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sphere_agents::{AgentError, AgentRunner};
use sphere_core::{step, AgentResult, AnalysisRun, AuditRecorder, CancelToken, PersonaSet, RunStatus};

/// Message recorded when no agent produced output
pub const ALL_AGENTS_FAILED: &str = "All agents failed. Check your LLM configuration.";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running agents
    pub max_concurrency: usize,
    /// Per-agent deadline, retries included
    pub agent_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            agent_timeout: Some(Duration::from_secs(180)),
        }
    }
}

/// Runs a persona set against one query
pub struct Orchestrator {
    runner: AgentRunner,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(runner: AgentRunner, config: OrchestratorConfig) -> Self {
        let runner = match config.agent_timeout {
            Some(timeout) => runner.with_agent_timeout(timeout),
            None => runner,
        };
        Self {
            runner,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn runner(&self) -> &AgentRunner {
        &self.runner
    }

    /// Run every persona and return the run with results in persona order
    pub async fn run(
        &self,
        query: &str,
        context: Option<&str>,
        personas: &PersonaSet,
        audit: &Arc<AuditRecorder>,
        cancel: &CancelToken,
    ) -> AnalysisRun {
        let started = Instant::now();
        let label = self.runner.gateway().label();

        let mut run = AnalysisRun::new(query, personas.name(), &label);
        run.context = context.map(str::to_string);
        run.status = RunStatus::Running;

        audit.info(step::ANALYSIS_STARTED, format!("Starting analysis: {}", query));
        audit.info(step::LLM_PROVIDER, format!("Using {}", label));
        audit.info(
            step::PERSONA_LOADED,
            format!("Loaded persona '{}' with {} agents", personas.name(), personas.len()),
        );

        if personas.is_empty() {
            audit.error(step::ERROR, format!("Persona '{}' has no agents", personas.name()));
            run.error = Some(format!("Persona '{}' has no agents", personas.name()));
            run.status = RunStatus::Failed;
            run.elapsed = started.elapsed();
            run.audit = audit.entries();
            return run;
        }

        let permits = self.max_concurrency.min(personas.len());
        info!("Running {} agents ({} at a time)", personas.len(), permits);

        let semaphore = Arc::new(Semaphore::new(permits));
        let context = context.map(str::to_string);
        let mut pending = FuturesUnordered::new();

        for (index, persona) in personas.personas().iter().enumerate() {
            let runner = self.runner.clone();
            let task_persona = persona.clone();
            let query = query.to_string();
            let context = context.clone();
            let audit = audit.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                runner
                    .run(&task_persona, &query, context.as_deref(), &audit, &cancel)
                    .await
            });

            let persona = persona.clone();
            pending.push(async move { (index, persona, handle.await) });
        }

        let mut slots: Vec<Option<AgentResult>> = vec![None; personas.len()];

        while let Some((index, persona, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let error = AgentError::Aborted(e.to_string());
                    audit.error(step::AGENT_FAILED, format!("{} failed: {}", persona.role, error));
                    AgentResult::failed(&persona, error.status(), error.to_string(), Duration::ZERO)
                }
            };

            debug!("{} finished with status {}", result.role, result.status);
            let slot = &mut slots[index];
            if slot.is_none() {
                *slot = Some(result);
            } else {
                warn!("Duplicate result for {} ignored", persona.role);
            }
        }

        run.results = slots.into_iter().flatten().collect();
        run.status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::from_results(&run.results)
        };

        if run.status == RunStatus::Failed {
            audit.error(step::ERROR, ALL_AGENTS_FAILED);
            run.error = Some(ALL_AGENTS_FAILED.to_string());
        }

        info!(
            "{} of {} agents succeeded ({})",
            run.ok_count(),
            run.results.len(),
            run.status
        );

        run.elapsed = started.elapsed();
        run.audit = audit.entries();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{persona_set, RoleScriptedBackend};
    use sphere_agents::RetryPolicy;
    use sphere_core::AgentStatus;

    fn orchestrator(backend: Arc<RoleScriptedBackend>, max_concurrency: usize) -> Orchestrator {
        let runner = AgentRunner::new(backend, RetryPolicy::default().with_max_attempts(1));
        Orchestrator::new(
            runner,
            OrchestratorConfig {
                max_concurrency,
                agent_timeout: Some(Duration::from_secs(5)),
            },
        )
    }

    #[tokio::test]
    async fn test_all_success_in_persona_order_despite_reversed_completion() {
        let roles = ["A", "B", "C", "D", "E"];
        let backend = RoleScriptedBackend::new();
        for (i, role) in roles.iter().enumerate() {
            backend.delay(role, Duration::from_millis(10 * (roles.len() - i) as u64));
        }

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend.clone(), 8)
            .run("q", None, &persona_set(&roles), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Complete);
        let order: Vec<_> = run.results.iter().map(|r| r.role.as_str()).collect();
        assert_eq!(order, roles);
        let positions: Vec<_> = run.results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);

        // Completion order really was reversed
        let completions: Vec<_> = audit
            .entries()
            .into_iter()
            .filter(|e| e.step == step::AGENT_COMPLETE)
            .map(|e| e.message)
            .collect();
        assert!(completions[0].starts_with("E "));
    }

    #[tokio::test]
    async fn test_one_failure_is_partial() {
        let backend = RoleScriptedBackend::new();
        backend.fail("B", sphere_agents::ProviderError::Network("reset".into()));

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend, 4)
            .run("q", None, &persona_set(&["A", "B", "C"]), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::PartialComplete);
        assert_eq!(run.results[1].status, AgentStatus::Error);
        assert_eq!(run.ok_count(), 2);
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn test_all_failures_mark_run_failed() {
        let backend = RoleScriptedBackend::new();
        for role in ["A", "B"] {
            backend.fail(role, sphere_agents::ProviderError::Auth("nope".into()));
        }

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend, 4)
            .run("q", None, &persona_set(&["A", "B"]), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(ALL_AGENTS_FAILED));
        assert_eq!(run.audit.last().unwrap().step, step::ERROR);
    }

    #[tokio::test]
    async fn test_empty_persona_set_fails_with_error_entry() {
        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(RoleScriptedBackend::new(), 4)
            .run("q", None, &persona_set(&[]), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.results.is_empty());
        assert!(run.audit.iter().any(|e| e.step == step::ERROR));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let roles = ["A", "B", "C", "D", "E", "F"];
        let backend = RoleScriptedBackend::new();
        for role in roles {
            backend.delay(role, Duration::from_millis(20));
        }

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend.clone(), 2)
            .run("q", None, &persona_set(&roles), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Complete);
        assert!(backend.peak_in_flight() <= 2);
        assert_eq!(backend.calls(), roles.len());
    }

    #[tokio::test]
    async fn test_slow_agent_times_out_without_cancelling_siblings() {
        let backend = RoleScriptedBackend::new();
        backend.delay("Slow", Duration::from_secs(30));

        let runner = AgentRunner::new(backend, RetryPolicy::default().with_max_attempts(1));
        let orchestrator = Orchestrator::new(
            runner,
            OrchestratorConfig {
                max_concurrency: 4,
                agent_timeout: Some(Duration::from_millis(50)),
            },
        );

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator
            .run("q", None, &persona_set(&["Fast", "Slow"]), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::PartialComplete);
        assert_eq!(run.results[0].status, AgentStatus::Ok);
        assert_eq!(run.results[1].status, AgentStatus::Timeout);
    }

    #[tokio::test]
    async fn test_panicking_agent_is_isolated() {
        let backend = RoleScriptedBackend::new();
        backend.panic_on("Boom");

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend, 4)
            .run("q", None, &persona_set(&["Calm", "Boom"]), &audit, &CancelToken::new())
            .await;

        assert_eq!(run.status, RunStatus::PartialComplete);
        assert_eq!(run.results[1].role, "Boom");
        assert!(run.results[1].error.as_deref().unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_cancellation_marks_run_cancelled() {
        let roles = ["A", "B", "C"];
        let backend = RoleScriptedBackend::new();
        for role in roles {
            backend.delay(role, Duration::from_secs(30));
        }

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let audit = Arc::new(AuditRecorder::new());
        let run = orchestrator(backend, 4)
            .run("q", None, &persona_set(&roles), &audit, &cancel)
            .await;

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.results.len(), 3);
        assert!(run.results.iter().all(|r| r.error.as_deref() == Some("cancelled")));
    }
}
