//! Synthesis of agent perspectives
//!
//! Combines the successful agent outputs of a run into one final analysis
//! via a single gateway call. Failure here never discards agent output: the
//! run is downgraded and the report falls back to the raw perspectives.

use thiserror::Error;
use tracing::info;

use sphere_core::{step, AnalysisRun, AuditRecorder, CancelToken, RunStatus};

use crate::{send_with_retry, CompletionRequest, ProviderError, RetryPolicy, SharedGateway};

/// Lower than the per-agent temperature
pub const SYNTHESIS_TEMPERATURE: f32 = 0.5;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are the Master Synthesizer in the Sphere multi-agent analysis system.

Your role is to:
1. Synthesize insights from multiple agent perspectives into a coherent analysis
2. Identify key themes, agreements, and productive tensions
3. Extract actionable recommendations
4. Present a clear, well-structured final report

Format your response as a professional analysis report with:
- Executive Summary (2-3 sentences)
- Key Insights (numbered list of the most important findings)
- Synthesis (how the perspectives connect and inform each other)
- Recommendations (concrete next steps or actions)
- Areas for Further Investigation (optional)
";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("no successful agent output to synthesize")]
    NoInput,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("cancelled")]
    Cancelled,
}

/// Issues the synthesis call for a finished run
#[derive(Clone)]
pub struct Synthesizer {
    gateway: SharedGateway,
    retry: RetryPolicy,
}

impl Synthesizer {
    pub fn new(gateway: SharedGateway, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    /// Build the combined prompt from the ordered successful outputs
    pub fn build_request(run: &AnalysisRun) -> Result<CompletionRequest, SynthesisError> {
        let perspectives: Vec<String> = run
            .successful_results()
            .map(|r| format!("### {} Perspective\n{}\n\n---\n", r.role, r.output.trim()))
            .collect();

        if perspectives.is_empty() {
            return Err(SynthesisError::NoInput);
        }

        let user = format!(
            "## Original Query\n{}\n\n\
             ## Agent Perspectives ({} agents from '{}' persona)\n\n\
             {}\n\
             Please synthesize these perspectives into a comprehensive analysis report. \
             Identify the key themes, areas of agreement, productive tensions, and \
             actionable recommendations.",
            run.query,
            perspectives.len(),
            run.persona_set,
            perspectives.join("\n"),
        );

        Ok(CompletionRequest::new(SYNTHESIS_SYSTEM_PROMPT, &user).with_temperature(SYNTHESIS_TEMPERATURE))
    }

    pub async fn synthesize(&self, run: &AnalysisRun, cancel: &CancelToken) -> Result<String, SynthesisError> {
        let request = Self::build_request(run)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SynthesisError::Cancelled),
            result = send_with_retry(self.gateway.as_ref(), &request, &self.retry) => {
                result.map_err(SynthesisError::from)
            }
        }
    }

    /// Synthesize and fold the outcome into `run`.
    ///
    /// Runs with no usable output are left untouched.
    pub async fn apply(&self, run: &mut AnalysisRun, audit: &AuditRecorder, cancel: &CancelToken) {
        let inputs = run.ok_count();
        if inputs == 0 {
            return;
        }

        audit.info(
            step::SYNTHESIS_START,
            format!("Synthesizing {} agent perspectives", inputs),
        );
        info!("Synthesizing {} of {} agent outputs", inputs, run.results.len());

        match self.synthesize(run, cancel).await {
            Ok(text) => {
                audit.info(
                    step::SYNTHESIS_COMPLETE,
                    format!("Synthesis complete ({} chars)", text.len()),
                );
                run.synthesis = Some(text);
            }
            Err(SynthesisError::Cancelled) => {
                audit.warn(step::SYNTHESIS_FALLBACK, "Synthesis cancelled, raw agent insights kept");
                run.synthesis_error = Some(SynthesisError::Cancelled.to_string());
                run.status = RunStatus::Cancelled;
            }
            Err(e) => {
                audit.warn(
                    step::SYNTHESIS_FALLBACK,
                    format!("Synthesis failed, falling back to raw agent insights: {}", e),
                );
                run.synthesis_error = Some(e.to_string());
                run.status = RunStatus::SynthesisFailed;
            }
        }
    }
}
