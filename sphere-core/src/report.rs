//! Report document format
//!
//! A report is the canonical Markdown serialization of an [`AnalysisRun`].
//! Downstream log tooling locates sections by their fixed markers, so the
//! heading text, section order and audit line shape below must not change.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;
use thiserror::Error;

use crate::{AgentStatus, AnalysisRun, AuditEntry, RunStatus, Severity};

const HEADER: &str = "# Analysis Report\n\n- **Timestamp**: ";
const QUERY_MARKER: &str = "\n- **Query**: \"";
const SYNTHESIS_MARKER: &str = "\"\n\n---\n\n## Synthesis\n\n";
const AUDIT_MARKER: &str = "\n\n---\n\n## Audit Trail\n\n```\n";
const AUDIT_END: &str = "\n```\n";

static AUDIT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\] (INFO|WARN|ERROR) (\S+) - (.*)$").unwrap()
});

/// Errors from parsing a report document
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("Missing section marker: {0}")]
    MissingMarker(&'static str),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Malformed audit line {line}: {text}")]
    MalformedAuditLine { line: usize, text: String },
}

/// Parsed (or to-be-rendered) report content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    /// Body of the `## Synthesis` section
    pub synthesis: String,
    pub audit: Vec<AuditEntry>,
}

impl Report {
    /// Build the report for a finished run
    pub fn from_run(run: &AnalysisRun) -> Self {
        Self {
            timestamp: run.started_at,
            query: run.query.clone(),
            synthesis: synthesis_body(run),
            audit: run.audit.clone(),
        }
    }

    pub fn render(&self) -> String {
        let trail = self
            .audit
            .iter()
            .map(format_audit_line)
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{HEADER}{}Z{QUERY_MARKER}{}{SYNTHESIS_MARKER}{}{AUDIT_MARKER}{}{AUDIT_END}",
            format_timestamp(&self.timestamp),
            escape(&self.query),
            self.synthesis,
            trail,
        )
    }

    pub fn parse(document: &str) -> Result<Self, ReportError> {
        let rest = document
            .strip_prefix(HEADER)
            .ok_or(ReportError::MissingMarker("# Analysis Report"))?;

        let (timestamp, rest) = rest
            .split_once(QUERY_MARKER)
            .ok_or(ReportError::MissingMarker("- **Query**"))?;
        let timestamp = parse_timestamp(timestamp)?;

        let (query, rest) = rest
            .split_once(SYNTHESIS_MARKER)
            .ok_or(ReportError::MissingMarker("## Synthesis"))?;

        // The synthesis body is free-form; the audit trail is always last.
        let split = rest
            .rfind(AUDIT_MARKER)
            .ok_or(ReportError::MissingMarker("## Audit Trail"))?;
        let synthesis = &rest[..split];
        let trail = &rest[split + AUDIT_MARKER.len()..];

        // An empty trail renders as "```\n\n```\n"
        let trail = trail
            .strip_suffix(AUDIT_END)
            .or_else(|| trail.strip_suffix("```\n"))
            .ok_or(ReportError::MissingMarker("closing fence"))?;

        let audit = trail
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(i, line)| parse_audit_line(i + 1, line))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            timestamp,
            query: unescape(query),
            synthesis: synthesis.to_string(),
            audit,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ReportError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ReportError::InvalidTimestamp(s.to_string()))
}

fn format_audit_line(entry: &AuditEntry) -> String {
    format!(
        "[{}Z] {} {} - {}",
        format_timestamp(&entry.timestamp),
        entry.severity,
        entry.step,
        escape(&entry.message)
    )
}

fn parse_audit_line(line_no: usize, line: &str) -> Result<AuditEntry, ReportError> {
    let malformed = || ReportError::MalformedAuditLine {
        line: line_no,
        text: line.to_string(),
    };

    let caps = AUDIT_LINE_REGEX.captures(line).ok_or_else(malformed)?;
    let timestamp = parse_timestamp(&caps[1])?;
    let severity: Severity = caps[2].parse().map_err(|_| malformed())?;

    Ok(AuditEntry {
        timestamp,
        step: caps[3].to_string(),
        message: unescape(&caps[4]),
        severity,
    })
}

/// Keep queries and audit messages on a single line
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Render the body of the synthesis section
fn synthesis_body(run: &AnalysisRun) -> String {
    let mut body = String::new();

    match run.status {
        RunStatus::Failed => {
            let reason = run
                .error
                .as_deref()
                .unwrap_or("All agents failed. Check your LLM configuration.");
            let _ = write!(body, "## Error\n\n{}\n", reason);
            if !run.results.is_empty() {
                body.push('\n');
                push_perspectives(&mut body, run);
            }
            return body.trim_end().to_string();
        }
        RunStatus::Cancelled => {
            body.push_str("## Cancelled\n\nThe analysis was cancelled before it completed.\n\n");
            push_perspectives(&mut body, run);
            return body.trim_end().to_string();
        }
        _ => {}
    }

    let elapsed = chrono::Duration::from_std(run.elapsed).unwrap_or_else(|_| chrono::Duration::zero());
    let finished = run.started_at + elapsed;
    let _ = write!(
        body,
        "# Sphere Analysis Report\n\n\
         **Query:** {}\n\
         **Persona:** {}\n\
         **Agents:** {}/{}\n\
         **LLM:** {}\n\
         **Generated:** {}Z\n\
         **Processing Time:** {:.1}s\n\
         **Status:** {}\n\n---\n\n",
        run.query,
        run.persona_set,
        run.ok_count(),
        run.results.len(),
        run.provider,
        format_timestamp(&finished),
        run.elapsed.as_secs_f64(),
        run.status,
    );

    match (&run.synthesis, &run.synthesis_error) {
        (Some(synthesis), _) => {
            body.push_str(synthesis.trim_end());
            body.push('\n');
        }
        (None, error) => {
            let _ = writeln!(
                body,
                "*Note: Automated synthesis failed{}. Raw agent insights are shown below.*",
                error.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
            );
        }
    }

    body.push_str("\n---\n\n");
    push_perspectives(&mut body, run);
    body.trim_end().to_string()
}

fn push_perspectives(body: &mut String, run: &AnalysisRun) {
    body.push_str("## Individual Agent Perspectives\n\n");
    for result in &run.results {
        let _ = writeln!(body, "### {}", result.role);
        match result.status {
            AgentStatus::Ok => {
                let _ = writeln!(body, "{}\n", result.output.trim_end());
            }
            status => {
                let _ = writeln!(
                    body,
                    "*No output ({}): {}*\n",
                    status,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentResult, AuditRecorder, Persona};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sample_run() -> AnalysisRun {
        let mut run = AnalysisRun::new("Should we \"rewrite\" it?", "General Analysis", "Ollama (llama3.2)");
        let mut skeptic = Persona::new("Skeptic", "Question it.");
        skeptic.position = 1;

        run.results = vec![
            AgentResult::ok(&Persona::new("Rationalist", "Be logical."), "Logic says no.".into(), Duration::from_millis(40)),
            AgentResult::failed(&skeptic, AgentStatus::Timeout, "deadline of 5s elapsed".into(), Duration::from_secs(5)),
        ];
        run.synthesis = Some("## Executive Summary\n\nDo not rewrite.".into());
        run.status = RunStatus::PartialComplete;
        run.elapsed = Duration::from_millis(5200);

        let recorder = AuditRecorder::new();
        recorder.info("ANALYSIS_STARTED", "Query: 'Should we rewrite it?'");
        recorder.warn("AGENT_TIMEOUT", "Skeptic: deadline elapsed\nsecond line with \\ backslash");
        recorder.error("ERROR", "");
        recorder.info("SYNTHESIS_COMPLETE", "contains ``` and - dashes [x]");
        run.audit = recorder.entries();
        run
    }

    #[test]
    fn test_render_has_fixed_sections_in_order() {
        let text = Report::from_run(&sample_run()).render();

        let markers = ["# Analysis Report", "- **Timestamp**:", "- **Query**:", "## Synthesis", "## Audit Trail"];
        let positions: Vec<usize> = markers.iter().map(|m| text.find(m).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("- **Query**: \"Should we \"rewrite\" it?\""));
        assert!(text.ends_with("```\n"));
    }

    #[test]
    fn test_parse_recovers_rendered_report() {
        let run = sample_run();
        let report = Report::from_run(&run);
        let parsed = Report::parse(&report.render()).unwrap();

        assert_eq!(parsed.query, run.query);
        assert_eq!(parsed.timestamp, run.started_at);
        assert_eq!(parsed.audit, run.audit);
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_empty_audit_trail_round_trips() {
        let mut run = sample_run();
        run.audit.clear();
        let parsed = Report::parse(&Report::from_run(&run).render()).unwrap();
        assert!(parsed.audit.is_empty());
    }

    #[test]
    fn test_synthesis_fallback_note() {
        let mut run = sample_run();
        run.synthesis = None;
        run.synthesis_error = Some("rate limited".into());
        run.status = RunStatus::SynthesisFailed;

        let body = Report::from_run(&run).synthesis;
        assert!(body.contains("Automated synthesis failed (rate limited)"));
        assert!(body.contains("Logic says no."));
        assert!(body.contains("### Skeptic\n*No output (timeout)"));
    }

    #[test]
    fn test_failed_run_renders_error_section() {
        let mut run = sample_run();
        run.results.clear();
        run.synthesis = None;
        run.status = RunStatus::Failed;
        run.error = Some("No agents found in persona set.".into());

        let body = Report::from_run(&run).synthesis;
        assert_eq!(body, "## Error\n\nNo agents found in persona set.");
    }

    #[test]
    fn test_parse_rejects_foreign_documents() {
        assert_eq!(
            Report::parse("# Something else\n"),
            Err(ReportError::MissingMarker("# Analysis Report"))
        );

        let text = Report::from_run(&sample_run())
            .render()
            .replace("] WARN AGENT_TIMEOUT", "] LOUD AGENT_TIMEOUT");
        assert!(matches!(
            Report::parse(&text),
            Err(ReportError::MalformedAuditLine { line: 2, .. })
        ));
    }

    #[test]
    fn test_query_containing_section_markers_round_trips() {
        let mut run = sample_run();
        run.query = "tricky\"\n\n---\n\n## Synthesis\n\nnot really".into();

        let text = Report::from_run(&run).render();
        assert!(text.contains("- **Query**: \"tricky\"\\n\\n---\\n\\n## Synthesis\\n\\nnot really\"\n"));

        let parsed = Report::parse(&text).unwrap();
        assert_eq!(parsed.query, run.query);
        assert_eq!(parsed.audit, run.audit);
        assert!(parsed.synthesis.starts_with("# Sphere Analysis Report"));
        assert!(parsed.synthesis.contains("Do not rewrite."));
    }

    #[test]
    fn test_escape_round_trip() {
        for s in ["plain", "a\nb", "tab\\n literal", "trailing \\", "\r\n"] {
            assert_eq!(unescape(&escape(s)), s);
        }
    }
}
