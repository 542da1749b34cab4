//! Analysis run model
//!
//! An [`AnalysisRun`] is one execution of the pipeline for a single query:
//! per-persona results in persona order, the optional synthesis, the audit
//! trail and a [`RunStatus`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::{AuditEntry, Persona};

/// Outcome of a single agent call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    Error,
    Timeout,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Ok => "ok",
            AgentStatus::Error => "error",
            AgentStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// The result of running one persona. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub role: String,
    pub position: usize,
    /// Completion text, empty unless `status` is `Ok`
    pub output: String,
    pub status: AgentStatus,
    pub latency: Duration,
    pub error: Option<String>,
}

impl AgentResult {
    pub fn ok(persona: &Persona, output: String, latency: Duration) -> Self {
        Self {
            role: persona.role.clone(),
            position: persona.position,
            output,
            status: AgentStatus::Ok,
            latency,
            error: None,
        }
    }

    pub fn failed(persona: &Persona, status: AgentStatus, detail: String, latency: Duration) -> Self {
        Self {
            role: persona.role.clone(),
            position: persona.position,
            output: String::new(),
            status,
            latency,
            error: Some(detail),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AgentStatus::Ok
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Every agent succeeded
    Complete,
    /// At least one agent succeeded and at least one did not
    PartialComplete,
    /// No agent produced usable output
    Failed,
    /// Agents produced output but the synthesis call failed
    SynthesisFailed,
    Cancelled,
}

impl RunStatus {
    /// Status implied by a finished set of agent results
    pub fn from_results(results: &[AgentResult]) -> Self {
        let ok = results.iter().filter(|r| r.is_ok()).count();
        if ok == 0 {
            RunStatus::Failed
        } else if ok == results.len() {
            RunStatus::Complete
        } else {
            RunStatus::PartialComplete
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::PartialComplete => "partial_complete",
            RunStatus::Failed => "failed",
            RunStatus::SynthesisFailed => "synthesis_failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Length of the timestamp-derived part of a run id (`YYYYMMDD_HHMMSS`)
const RUN_ID_BASE_LEN: usize = 15;

/// Run identifier, ordered by timestamp then numeric sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.format("%Y%m%d_%H%M%S").to_string())
    }

    /// Parse an id, rejecting anything not shaped like `YYYYMMDD_HHMMSS[_NNNN]`
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() < RUN_ID_BASE_LEN || bytes[8] != b'_' {
            return None;
        }
        let digits_ok = bytes[..8].iter().chain(&bytes[9..RUN_ID_BASE_LEN]).all(u8::is_ascii_digit);
        if !digits_ok {
            return None;
        }
        let suffix_ok = match &s[RUN_ID_BASE_LEN..] {
            "" => true,
            rest => rest.strip_prefix('_').is_some_and(|n| {
                n.bytes().all(|b| b.is_ascii_digit()) && n.parse::<u64>().is_ok()
            }),
        };
        suffix_ok.then(|| Self(s.to_string()))
    }

    /// Extract the id from a `report_<id>.md` file name
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_prefix("report_")
            .and_then(|rest| rest.strip_suffix(".md"))
            .and_then(Self::parse)
    }

    pub fn file_name(&self) -> String {
        format!("report_{}.md", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn base(&self) -> &str {
        &self.0[..RUN_ID_BASE_LEN]
    }

    /// Sequence suffix, 0 when absent
    fn seq(&self) -> u64 {
        self.0[RUN_ID_BASE_LEN..]
            .strip_prefix('_')
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    /// The smallest id that is `>= self` and strictly greater than `latest`.
    ///
    /// Collisions within the same second get a zero-padded sequence suffix.
    /// The suffix widens past `_9999`; ordering stays numeric.
    pub fn after(self, latest: Option<&RunId>) -> RunId {
        let Some(latest) = latest else {
            return self;
        };
        if self > *latest {
            return self;
        }
        RunId(format!("{}_{:04}", latest.base(), latest.seq().saturating_add(1)))
    }
}

impl Ord for RunId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base()
            .cmp(other.base())
            .then_with(|| self.seq().cmp(&other.seq()))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RunId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One complete execution of the pipeline for a single query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: RunId,
    pub query: String,
    pub context: Option<String>,
    /// Name of the persona set the run used
    pub persona_set: String,
    /// Provider/model label, e.g. `Ollama (llama3.2)`
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One entry per persona, in persona order
    pub results: Vec<AgentResult>,
    pub synthesis: Option<String>,
    pub synthesis_error: Option<String>,
    /// Run-level failure reason (e.g. empty persona set)
    pub error: Option<String>,
    pub audit: Vec<AuditEntry>,
    pub status: RunStatus,
}

impl AnalysisRun {
    pub fn new(query: &str, persona_set: &str, provider: &str) -> Self {
        let started_at = Utc::now().trunc_subsecs(6);
        Self {
            run_id: RunId::from_timestamp(started_at),
            query: query.to_string(),
            context: None,
            persona_set: persona_set.to_string(),
            provider: provider.to_string(),
            started_at,
            elapsed: Duration::ZERO,
            results: Vec::new(),
            synthesis: None,
            synthesis_error: None,
            error: None,
            audit: Vec::new(),
            status: RunStatus::Pending,
        }
    }

    /// Successful results, in persona order
    pub fn successful_results(&self) -> impl Iterator<Item = &AgentResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    pub fn ok_count(&self) -> usize {
        self.successful_results().count()
    }

    pub fn has_usable_output(&self) -> bool {
        self.ok_count() > 0
    }

    /// Complete or partially complete with a finished synthesis
    pub fn is_successful(&self) -> bool {
        matches!(self.status, RunStatus::Complete | RunStatus::PartialComplete)
            && self.synthesis.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn persona(role: &str, position: usize) -> Persona {
        let mut p = Persona::new(role, "prompt");
        p.position = position;
        p
    }

    #[test]
    fn test_status_from_results() {
        let ok = AgentResult::ok(&persona("A", 0), "out".into(), Duration::from_millis(5));
        let err = AgentResult::failed(&persona("B", 1), AgentStatus::Error, "boom".into(), Duration::ZERO);
        let timeout = AgentResult::failed(&persona("C", 2), AgentStatus::Timeout, "slow".into(), Duration::ZERO);

        assert_eq!(RunStatus::from_results(&[ok.clone(), ok.clone()]), RunStatus::Complete);
        assert_eq!(RunStatus::from_results(&[ok.clone(), timeout.clone()]), RunStatus::PartialComplete);
        assert_eq!(RunStatus::from_results(&[err, timeout]), RunStatus::Failed);
        assert_eq!(RunStatus::from_results(&[]), RunStatus::Failed);
    }

    #[test]
    fn test_run_id_from_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 5, 3).unwrap();
        let id = RunId::from_timestamp(ts);
        assert_eq!(id.as_str(), "20261019_080503");
        assert_eq!(id.file_name(), "report_20261019_080503.md");
        assert_eq!(RunId::from_file_name("report_20261019_080503.md"), Some(id));
    }

    #[test]
    fn test_run_id_after_is_strictly_increasing() {
        let base = RunId::parse("20261019_080503").unwrap();

        assert_eq!(base.clone().after(None), base);

        let older = RunId::parse("20261019_080502_0003").unwrap();
        assert_eq!(base.clone().after(Some(&older)), base);

        let same = base.clone().after(Some(&base));
        assert_eq!(same.as_str(), "20261019_080503_0001");
        assert!(same > base);

        let next = base.clone().after(Some(&same));
        assert_eq!(next.as_str(), "20261019_080503_0002");

        // Clock moved backwards: still ordered after the newest id
        let newer = RunId::parse("20261019_090000").unwrap();
        let bumped = base.after(Some(&newer));
        assert_eq!(bumped.as_str(), "20261019_090000_0001");
    }

    #[test]
    fn test_run_id_parse_rejects_garbage() {
        assert!(RunId::parse("notes").is_none());
        assert!(RunId::parse("20261019-080503").is_none());
        assert!(RunId::parse("20261019_080503_").is_none());
        assert!(RunId::from_file_name("report_abc.md").is_none());
        assert!(RunId::from_file_name("summary_20261019_080503.md").is_none());
        assert!(RunId::parse("20261019_080503_99999999999999999999999").is_none());
    }

    #[test]
    fn test_run_id_sequence_rolls_past_four_digits() {
        let base = RunId::parse("20261019_080503").unwrap();
        let latest = RunId::parse("20261019_080503_9999").unwrap();

        let next = base.clone().after(Some(&latest));
        assert_eq!(next.as_str(), "20261019_080503_10000");
        assert!(next > latest);

        let after_next = base.after(Some(&next));
        assert_eq!(after_next.as_str(), "20261019_080503_10001");
        assert!(after_next > next);

        let mut ids = vec![after_next.clone(), latest.clone(), next.clone()];
        ids.sort();
        assert_eq!(ids, vec![latest, next, after_next]);
    }
}
