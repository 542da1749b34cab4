//! Single-persona agent execution
//!
//! An [`AgentRunner`] turns one persona plus the query into exactly one
//! [`AgentResult`]. Provider failures, the per-agent deadline and run-level
//! cancellation all end up inside the result; nothing is propagated.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use sphere_core::{step, AgentResult, AgentStatus, AuditRecorder, CancelToken, Persona};

use crate::{send_with_retry, CompletionRequest, ProviderError, RetryPolicy, SharedGateway};

/// Sampling temperature for per-persona analysis
pub const AGENT_TEMPERATURE: f32 = 0.7;

/// Why a single agent produced no output
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no result within agent deadline of {0:?}")]
    Deadline(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("agent task aborted: {0}")]
    Aborted(String),
}

impl AgentError {
    /// Result status this error maps to
    pub fn status(&self) -> AgentStatus {
        match self {
            AgentError::Deadline(_) => AgentStatus::Timeout,
            AgentError::Provider(e) if e.is_timeout() => AgentStatus::Timeout,
            _ => AgentStatus::Error,
        }
    }
}

/// Runs one persona against the configured gateway
#[derive(Clone)]
pub struct AgentRunner {
    gateway: SharedGateway,
    retry: RetryPolicy,
    agent_timeout: Option<Duration>,
}

impl AgentRunner {
    pub fn new(gateway: SharedGateway, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            retry,
            agent_timeout: None,
        }
    }

    /// Bound the whole call, retries included
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    /// Build the role-specific request for `persona`
    pub fn build_request(persona: &Persona, query: &str, context: Option<&str>) -> CompletionRequest {
        let system = format!(
            "You are the {role} agent in a multi-agent analysis system called Sphere.\n\n\
             Your Perspective: {perspective}\n\n\
             Your Role: {prompt}\n\n\
             Guidelines:\n\
             - Provide analysis from your unique perspective\n\
             - Be concise but insightful (2-4 paragraphs)\n\
             - Focus on aspects others might miss\n\
             - End with a clear, actionable insight or observation\n",
            role = persona.role,
            perspective = persona.perspective,
            prompt = persona.prompt,
        );

        let mut user = format!("## Query to Analyze\n{}\n\n", query);
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            user.push_str(&format!("## Additional Context\n{}\n\n", context));
        }
        user.push_str(&format!(
            "Please provide your analysis as the {}. Focus on your unique perspective \
             and add value beyond what others are likely to say.",
            persona.role
        ));

        CompletionRequest::new(&system, &user).with_temperature(AGENT_TEMPERATURE)
    }

    /// Issue the call, racing it against the deadline and `cancel`
    pub async fn call(
        &self,
        persona: &Persona,
        query: &str,
        context: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, AgentError> {
        let request = Self::build_request(persona, query, context);
        let attempt = send_with_retry(self.gateway.as_ref(), &request, &self.retry);

        let bounded = async {
            match self.agent_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result.map_err(AgentError::from),
                    Err(_) => Err(AgentError::Deadline(limit)),
                },
                None => attempt.await.map_err(AgentError::from),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = bounded => result,
        }
    }

    /// Run one persona to completion, recording audit events
    pub async fn run(
        &self,
        persona: &Persona,
        query: &str,
        context: Option<&str>,
        audit: &AuditRecorder,
        cancel: &CancelToken,
    ) -> AgentResult {
        audit.info(step::AGENT_START, format!("{} starting analysis", persona.role));
        debug!("Running agent {} (position {})", persona.role, persona.position);

        let started = Instant::now();
        let outcome = self.call(persona, query, context, cancel).await;
        let latency = started.elapsed();

        match outcome {
            Ok(output) => {
                audit.info(
                    step::AGENT_COMPLETE,
                    format!(
                        "{} completed in {:.2}s ({} chars)",
                        persona.role,
                        latency.as_secs_f64(),
                        output.len()
                    ),
                );
                AgentResult::ok(persona, output, latency)
            }
            Err(e) => {
                let status = e.status();
                match (&e, status) {
                    (AgentError::Cancelled, _) => {
                        audit.warn(step::AGENT_FAILED, format!("{} cancelled", persona.role))
                    }
                    (_, AgentStatus::Timeout) => {
                        audit.warn(step::AGENT_TIMEOUT, format!("{} timed out: {}", persona.role, e))
                    }
                    _ => audit.error(step::AGENT_FAILED, format!("{} failed: {}", persona.role, e)),
                };
                AgentResult::failed(persona, status, e.to_string(), latency)
            }
        }
    }
}
