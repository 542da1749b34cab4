//! Run configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use sphere_agents::RetryPolicy;
use sphere_log::LogStoreConfig;

use crate::OrchestratorConfig;

/// Everything an analysis needs besides the gateway and the personas
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub retry: RetryPolicy,
    pub orchestrator: OrchestratorConfig,
    pub store: LogStoreConfig,
    /// Write reports for cancelled runs too
    pub persist_cancelled: bool,
}

impl AnalysisConfig {
    pub fn new<P: AsRef<Path>>(store_root: P) -> Self {
        Self {
            retry: RetryPolicy::default(),
            orchestrator: OrchestratorConfig::default(),
            store: LogStoreConfig::new(store_root),
            persist_cancelled: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.orchestrator.max_concurrency = max.max(1);
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.orchestrator.agent_timeout = timeout;
        self
    }

    pub fn with_persist_cancelled(mut self, persist: bool) -> Self {
        self.persist_cancelled = persist;
        self
    }

    pub fn store_root(&self) -> &PathBuf {
        &self.store.root
    }
}
