pub mod error;
pub mod probe;
pub mod result;
mod timed_io;
pub mod trace;

pub mod prelude {
    pub use super::error::{BoxError, PhaseError, ProbeError, ProbePhase};
    pub use super::probe::{
        DEFAULT_PROBE_TIMEOUT, Exchange, MAX_RETAINED_BODY, Prober, TraceCollector,
    };
    pub use super::result::{PhaseTimings, ProbeResult};
    pub use super::trace::{TraceEvent, TraceEventKind, TraceLog, TraceSink};
}

use std::fmt::Write;

/// Render an error together with its chain of causes.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, "\n\nCaused by: {}", src);
        err = src;
    }
    s
}
