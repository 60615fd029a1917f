use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::trace::TraceEvent;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The stage of a probe at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbePhase {
    Dns,
    Connect,
    Tls,
    Timeout,
    Other,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbePhase::Dns => "dns",
            ProbePhase::Connect => "connect",
            ProbePhase::Tls => "tls",
            ProbePhase::Timeout => "timeout",
            ProbePhase::Other => "other",
        };
        f.write_str(name)
    }
}

/// A failed phase, before it is tied to a task.
#[derive(Debug, Error)]
#[error("{phase} phase failed")]
pub struct PhaseError {
    pub phase: ProbePhase,
    #[source]
    pub source: BoxError,
}

impl PhaseError {
    pub(crate) fn new(phase: ProbePhase, source: impl Into<BoxError>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }
}

/// A probe that did not complete. `trace` holds every event captured before
/// the failure.
#[derive(Debug, Error)]
#[error("{phase} error probing {url}")]
pub struct ProbeError {
    pub phase: ProbePhase,
    pub target: String,
    pub url: String,
    #[source]
    pub source: BoxError,
    pub trace: Vec<TraceEvent>,
}

impl ProbeError {
    /// The partial trace as pretty JSON, for diagnostics.
    pub fn trace_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_probe::report;

    #[test]
    fn test_report_includes_phase_and_cause() {
        let error = ProbeError {
            phase: ProbePhase::Dns,
            target: "nonexistent.invalid".to_string(),
            url: "https://nonexistent.invalid".to_string(),
            source: "no record found".into(),
            trace: Vec::new(),
        };
        let rendered = report(&error);
        assert!(rendered.starts_with("dns error probing https://nonexistent.invalid"));
        assert!(rendered.contains("Caused by: no record found"));
    }
}
