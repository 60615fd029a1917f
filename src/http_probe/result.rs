use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use super::trace::{TraceEvent, TraceEventKind};

/// A completed probe. Timestamps are unix nanoseconds.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub target: String,
    pub url: String,
    pub method: String,
    pub start_time: i64,
    /// Stamped when the response head arrived.
    pub finish_time: i64,
    pub status_code: u16,
    pub content_length: u64,
    #[serde(skip)]
    pub body: Bytes,
    pub events: Vec<TraceEvent>,
}

impl ProbeResult {
    /// Response time in nanoseconds.
    pub fn response_time(&self) -> i64 {
        self.finish_time - self.start_time
    }

    pub fn timings(&self) -> PhaseTimings {
        PhaseTimings::from_events(self.start_time, self.finish_time, &self.events)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Per-phase durations derived from a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub dns: Option<Duration>,
    pub connect: Option<Duration>,
    pub tls: Option<Duration>,
    /// Request fully written until the first response byte.
    pub server_processing: Option<Duration>,
    /// Probe start until the first response byte.
    pub time_to_first_byte: Option<Duration>,
    pub total: Duration,
}

impl PhaseTimings {
    pub fn from_events(start_time: i64, finish_time: i64, events: &[TraceEvent]) -> Self {
        let first_byte = first_at(events, |k| matches!(k, TraceEventKind::GotFirstResponseByte));
        let wrote_request = first_at(events, |k| matches!(k, TraceEventKind::WroteRequest { .. }));

        Self {
            dns: span(
                events,
                |k| matches!(k, TraceEventKind::DnsStart { .. }),
                |k| matches!(k, TraceEventKind::DnsDone { .. }),
            ),
            connect: span(
                events,
                |k| matches!(k, TraceEventKind::ConnectStart { .. }),
                |k| matches!(k, TraceEventKind::ConnectDone { .. }),
            ),
            tls: span(
                events,
                |k| matches!(k, TraceEventKind::TlsHandshakeStart),
                |k| matches!(k, TraceEventKind::TlsHandshakeDone { .. }),
            ),
            server_processing: wrote_request.zip(first_byte).and_then(|(s, e)| between(s, e)),
            time_to_first_byte: first_byte.and_then(|e| between(start_time, e)),
            total: between(start_time, finish_time).unwrap_or_default(),
        }
    }
}

fn first_at(events: &[TraceEvent], is: impl Fn(&TraceEventKind) -> bool) -> Option<i64> {
    events.iter().find(|e| is(&e.kind)).map(|e| e.at)
}

/// First start marker to last done marker; happy-eyeballs style retries are
/// counted as part of the phase.
fn span(
    events: &[TraceEvent],
    is_start: impl Fn(&TraceEventKind) -> bool,
    is_done: impl Fn(&TraceEventKind) -> bool,
) -> Option<Duration> {
    let start = first_at(events, is_start)?;
    let done = events.iter().rev().find(|e| is_done(&e.kind))?.at;
    between(start, done)
}

fn between(start: i64, end: i64) -> Option<Duration> {
    u64::try_from(end.checked_sub(start)?).ok().map(Duration::from_nanos)
}

fn millis(d: Option<Duration>) -> String {
    d.map(|d| format!("{:.2}ms", d.as_secs_f64() * 1000.0))
        .unwrap_or_else(|| "N/A".to_string())
}

impl fmt::Display for PhaseTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dns={} connect={} tls={} processing={} ttfb={} total={}",
            millis(self.dns),
            millis(self.connect),
            millis(self.tls),
            millis(self.server_processing),
            millis(self.time_to_first_byte),
            millis(Some(self.total)),
        )
    }
}
