//! Stream events and evaluation output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker emitted in place of a dropped window
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Marker emitted when the measurement path fails
pub const FALLBACK_MARKER: &str = "[FALLBACK: MEASUREMENT_UNAVAILABLE]";

/// Terminal marker emitted when the lockout is set
pub const LOCKED_MARKER: &str = "[SYSTEM_LOCKED]";

/// One item produced by the redaction buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Verified fragment, in source order
    Fragment(String),
    /// A flagged window was dropped here
    Redacted,
    /// Measurement (or source) failed; stream ends
    Fallback,
    /// Lockout in effect; stream ends
    Locked,
    /// Last item of every stream that was not abandoned by its consumer
    Finished(StreamSummary),
}

impl StreamEvent {
    /// Text shown to the consumer (`None` for `Finished`)
    pub fn display_text(&self) -> Option<&str> {
        match self {
            Self::Fragment(text) => Some(text),
            Self::Redacted => Some(REDACTION_MARKER),
            Self::Fallback => Some(FALLBACK_MARKER),
            Self::Locked => Some(LOCKED_MARKER),
            Self::Finished(_) => None,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Redacted | Self::Fallback | Self::Locked)
    }
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    /// Input exhausted, nothing redacted
    Completed,
    /// Input exhausted, at least one window redacted
    Interdicted,
    /// Variance above twice the limit; lockout written
    SevereBreach,
    /// Embedding or sampling failed
    MeasurementUnavailable,
    /// Completion source failed
    SourceUnavailable,
    /// Lockout in effect
    SystemLocked,
}

impl FinalStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Interdicted => "INTERDICTED",
            Self::SevereBreach => "SEVERE_BREACH",
            Self::MeasurementUnavailable => "MEASUREMENT_UNAVAILABLE",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::SystemLocked => "SYSTEM_LOCKED",
        }
    }

    /// Did the stream run to the end of its input?
    pub fn ran_to_completion(&self) -> bool {
        matches!(self, Self::Completed | Self::Interdicted)
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Counters carried by `StreamEvent::Finished`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub status: FinalStatus,
    /// Fragments pulled from the source
    pub ingested: usize,
    /// Fragments emitted
    pub released: usize,
    /// Windows evaluated
    pub evaluations: usize,
    /// Windows dropped
    pub redactions: usize,
    /// Highest variance measured
    pub peak_variance: f64,
}

impl StreamSummary {
    pub fn new(status: FinalStatus) -> Self {
        Self {
            status,
            ingested: 0,
            released: 0,
            evaluations: 0,
            redactions: 0,
            peak_variance: 0.0,
        }
    }
}

/// Collected result of `Gasket::evaluate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub timestamp: DateTime<Utc>,
    /// Everything emitted, markers included, in order
    pub fragments: Vec<StreamEvent>,
    pub final_status: FinalStatus,
    pub summary: StreamSummary,
}

impl Evaluation {
    /// Build from a drained event stream
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let mut fragments = Vec::with_capacity(events.len());
        let mut summary = None;
        for event in events {
            match event {
                StreamEvent::Finished(s) => summary = Some(s),
                other => fragments.push(other),
            }
        }
        // A stream without a summary was cut short before it could report.
        let summary = summary.unwrap_or_else(|| StreamSummary::new(FinalStatus::SourceUnavailable));
        Self {
            timestamp: Utc::now(),
            fragments,
            final_status: summary.status,
            summary,
        }
    }

    /// Released text only (markers aside)
    pub fn released_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Fragment(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Text as the consumer saw it (markers inline)
    pub fn rendered_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|e| e.display_text())
            .collect()
    }

    pub fn redaction_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|e| matches!(e, StreamEvent::Redacted))
            .count()
    }

    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let color = match self.final_status {
            FinalStatus::Completed => "\x1b[32m",
            FinalStatus::Interdicted => "\x1b[33m",
            _ => "\x1b[31m",
        };
        format!(
            "{}\n{}status={} | released={} | redactions={} | evaluations={} | peak_v={:.4}\x1b[0m",
            self.rendered_text(),
            color,
            self.final_status,
            self.summary.released,
            self.summary.redactions,
            self.summary.evaluations,
            self.summary.peak_variance
        )
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        format!(
            "text={:?} | status={} | released={} | redactions={} | peak_v={:.4}",
            self.rendered_text(),
            self.final_status,
            self.summary.released,
            self.summary.redactions,
            self.summary.peak_variance
        )
    }
}

/// Result of the non-streaming `generate_and_verify` check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub is_safe: bool,
    pub variance: f64,
    pub health_index: f64,
    /// Completion 0, the canonical output
    pub consensus: String,
    pub reason: String,
    pub completions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_render_inline() {
        let mut summary = StreamSummary::new(FinalStatus::Interdicted);
        summary.redactions = 1;
        let eval = Evaluation::from_events(vec![
            StreamEvent::Fragment("a".into()),
            StreamEvent::Redacted,
            StreamEvent::Fragment("b".into()),
            StreamEvent::Finished(summary),
        ]);
        assert_eq!(eval.released_text(), "ab");
        assert_eq!(eval.rendered_text(), format!("a{}b", REDACTION_MARKER));
        assert_eq!(eval.final_status, FinalStatus::Interdicted);
        assert_eq!(eval.redaction_count(), 1);
    }

    #[test]
    fn test_missing_summary_is_not_success() {
        let eval = Evaluation::from_events(vec![StreamEvent::Fragment("x".into())]);
        assert!(!eval.final_status.ran_to_completion());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&StreamEvent::Fragment("hi".into())).unwrap();
        assert_eq!(json, r#"{"type":"fragment","data":"hi"}"#);
        let json = serde_json::to_string(&StreamEvent::Redacted).unwrap();
        assert_eq!(json, r#"{"type":"redacted"}"#);
    }
}
