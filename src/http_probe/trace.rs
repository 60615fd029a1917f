use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Wall-clock timestamps (unix nanoseconds) that never run backwards within one
/// probe: the wall clock is read once and every later reading is an offset from
/// a monotonic origin.
#[derive(Debug, Clone, Copy)]
pub struct TraceClock {
    anchor_nanos: i64,
    origin: Instant,
}

impl TraceClock {
    pub fn start() -> Self {
        Self {
            anchor_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> i64 {
        let offset = i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.anchor_nanos.saturating_add(offset)
    }
}

/// A network-lifecycle milestone observed while probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    /// About to obtain a connection to `host_port`.
    GetConn { host_port: String },
    DnsStart { host: String },
    DnsDone {
        addrs: Vec<IpAddr>,
        error: Option<String>,
    },
    ConnectStart {
        network: &'static str,
        addr: SocketAddr,
    },
    ConnectDone {
        network: &'static str,
        addr: SocketAddr,
        error: Option<String>,
    },
    TlsHandshakeStart,
    /// `cert_expires_at` is the peer certificate's not-after, in unix seconds.
    TlsHandshakeDone {
        cert_expires_at: Option<i64>,
        error: Option<String>,
    },
    GotConn {
        remote_addr: Option<SocketAddr>,
        reused: bool,
    },
    WroteHeaderField { name: String, value: String },
    WroteHeaders,
    WroteRequest { error: Option<String> },
    GotFirstResponseByte,
    Got1xxResponse { code: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Unix nanoseconds.
    pub at: i64,
    pub kind: TraceEventKind,
}

/// Receives the events of exactly one probe.
pub trait TraceSink {
    fn record(&mut self, event: TraceEvent);
}

/// Append-only event sequence owned by a single probe.
#[derive(Debug, Default)]
pub struct TraceLog {
    events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl TraceSink for TraceLog {
    fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

/// Cloneable handle for milestones observed outside the probe's own code path
/// (socket IO inside the HTTP connection, informational-response callbacks).
/// Events are queued and moved into the sink by [`Tracer::drain`].
#[derive(Debug, Clone)]
pub(crate) struct IoTap {
    clock: TraceClock,
    tx: UnboundedSender<TraceEvent>,
}

impl IoTap {
    pub(crate) fn emit(&self, kind: TraceEventKind) {
        // The receiver only goes away once the probe is finished with.
        let _ = self.tx.send(TraceEvent {
            at: self.clock.now(),
            kind,
        });
    }
}

/// Stamps events with the probe's clock and appends them to its sink.
pub(crate) struct Tracer<'a, S: ?Sized> {
    clock: TraceClock,
    sink: &'a mut S,
    tap: IoTap,
    tapped: UnboundedReceiver<TraceEvent>,
}

impl<'a, S: TraceSink + ?Sized> Tracer<'a, S> {
    pub(crate) fn new(clock: TraceClock, sink: &'a mut S) -> Self {
        let (tx, tapped) = mpsc::unbounded_channel();
        Self {
            clock,
            sink,
            tap: IoTap { clock, tx },
            tapped,
        }
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now()
    }

    pub(crate) fn mark(&mut self, kind: TraceEventKind) {
        let at = self.clock.now();
        self.mark_at(at, kind);
    }

    pub(crate) fn mark_at(&mut self, at: i64, kind: TraceEventKind) {
        self.sink.record(TraceEvent { at, kind });
    }

    pub(crate) fn tap(&self) -> IoTap {
        self.tap.clone()
    }

    pub(crate) fn drain(&mut self) {
        while let Ok(event) = self.tapped.try_recv() {
            self.sink.record(event);
        }
    }
}
