//! Analysis pipeline
//!
//! Orchestrate → synthesize → persist, for one query. Also hosts the
//! single-agent test path, which bypasses synthesis and the store.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use sphere_agents::{AgentRunner, SharedGateway, Synthesizer};
use sphere_core::{step, AgentResult, AnalysisRun, AuditRecorder, CancelToken, PersonaSet, RunStatus};
use sphere_log::{LogStore, PersistOutcome, PersistenceError};

use crate::{AnalysisConfig, Orchestrator};

/// A finished analysis and what happened to its report
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub run: AnalysisRun,
    /// `None` when persistence was skipped (cancelled run)
    pub persisted: Option<PersistOutcome>,
}

impl AnalysisOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        if self.run.status == RunStatus::Failed {
            1
        } else {
            0
        }
    }
}

/// The full analysis pipeline bound to one gateway and one store
pub struct Pipeline {
    orchestrator: Orchestrator,
    synthesizer: Synthesizer,
    store: LogStore,
    persist_cancelled: bool,
}

impl Pipeline {
    pub fn new(gateway: SharedGateway, config: AnalysisConfig) -> Self {
        let runner = AgentRunner::new(gateway.clone(), config.retry.clone());
        Self {
            orchestrator: Orchestrator::new(runner, config.orchestrator),
            synthesizer: Synthesizer::new(gateway, config.retry),
            store: LogStore::new(config.store),
            persist_cancelled: config.persist_cancelled,
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Run a full analysis and persist its report
    pub async fn analyze(
        &self,
        query: &str,
        context: Option<&str>,
        personas: &PersonaSet,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, PersistenceError> {
        let started = Instant::now();
        let audit = Arc::new(AuditRecorder::new());

        let mut run = self
            .orchestrator
            .run(query, context, personas, &audit, cancel)
            .await;

        if matches!(run.status, RunStatus::Complete | RunStatus::PartialComplete) {
            self.synthesizer.apply(&mut run, &audit, cancel).await;
        }

        run.elapsed = started.elapsed();
        match run.status {
            RunStatus::Cancelled => {
                audit.warn(
                    step::ANALYSIS_CANCELLED,
                    format!(
                        "Analysis cancelled after {} of {} agents",
                        run.ok_count(),
                        run.results.len()
                    ),
                );
            }
            RunStatus::Failed => {}
            status => {
                audit.info(
                    step::ANALYSIS_COMPLETE,
                    format!(
                        "Analysis {} in {:.2}s ({}/{} agents succeeded)",
                        status,
                        run.elapsed.as_secs_f64(),
                        run.ok_count(),
                        run.results.len()
                    ),
                );
            }
        }
        run.audit = audit.entries();

        if run.status == RunStatus::Cancelled && !self.persist_cancelled {
            info!("Run cancelled, report not persisted");
            return Ok(AnalysisOutcome { run, persisted: None });
        }

        let outcome = self.store.persist(&run).await?;
        run.run_id = outcome.run_id().clone();
        if let PersistOutcome::Warning(warning) = &outcome {
            warn!("{}", warning);
        }

        Ok(AnalysisOutcome {
            run,
            persisted: Some(outcome),
        })
    }

    /// Run a single persona from `personas`, bypassing synthesis and the store
    pub async fn test_agent(
        &self,
        personas: &PersonaSet,
        role: &str,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<AgentResult> {
        let persona = personas.find_role(role).ok_or_else(|| {
            anyhow!(
                "Unknown role '{}'. Available roles: {}",
                role,
                personas.roles().join(", ")
            )
        })?;

        let audit = AuditRecorder::new();
        Ok(self
            .orchestrator
            .runner()
            .run(persona, query, None, &audit, cancel)
            .await)
    }
}
