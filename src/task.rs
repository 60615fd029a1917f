use hyper::Method;

/// One unit of work: probe `target` with `method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    /// Hostname (optionally with port and path) as it arrived on the queue.
    pub target: String,
    pub method: Method,
}

impl ProbeTask {
    pub fn new(target: impl Into<String>, method: Method) -> Self {
        Self {
            target: target.into(),
            method,
        }
    }

    /// Decode a queue payload. Payloads are raw target bytes; invalid UTF-8 is
    /// replaced rather than rejected so a bad payload still surfaces as a probe
    /// failure with a diagnostic instead of vanishing.
    pub fn from_payload(payload: &[u8], method: Method) -> Self {
        let target = String::from_utf8_lossy(payload).trim().to_string();
        Self { target, method }
    }

    /// The URL this task probes. Bare targets are probed over HTTPS.
    pub fn url(&self) -> String {
        if self.target.starts_with("https://") || self.target.starts_with("http://") {
            self.target.clone()
        } else {
            format!("https://{}", self.target)
        }
    }
}
