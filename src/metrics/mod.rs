use chrono::Utc;

use crate::http_probe::result::ProbeResult;

pub mod line;

pub use line::{FieldValue, MetricRecord};

pub const HTTP_CHECK_MEASUREMENT: &str = "http_check";

const METHOD_TAG: &str = "method";
const SERVER_TAG: &str = "server";
const STATUS_CODE_TAG: &str = "status_code";

const CONTENT_LENGTH_FIELD: &str = "content_length";
const HTTP_RESPONSE_CODE_FIELD: &str = "http_response_code";
const RESPONSE_TIME_FIELD: &str = "response_time";

/// Encodes a completed probe as an `http_check` record.
///
/// Tags: `method`, `server` (the probed target) and `status_code`.
/// Fields: `content_length`, `http_response_code` and `response_time` in
/// nanoseconds. `timestamp` is the time of encoding, in unix nanoseconds.
///
/// Pure: the same result and timestamp always produce the same record.
pub fn encode(probe_result: &ProbeResult, timestamp: i64) -> MetricRecord {
    let content_length = i64::try_from(probe_result.content_length).unwrap_or(i64::MAX);

    MetricRecord::new(HTTP_CHECK_MEASUREMENT, timestamp)
        .tag(METHOD_TAG, probe_result.method.as_str())
        .tag(SERVER_TAG, probe_result.target.as_str())
        .tag(STATUS_CODE_TAG, probe_result.status_code.to_string())
        .field(CONTENT_LENGTH_FIELD, content_length)
        .field(
            HTTP_RESPONSE_CODE_FIELD,
            i64::from(probe_result.status_code),
        )
        .field(RESPONSE_TIME_FIELD, probe_result.response_time())
}

/// [`encode`] stamped with the current time.
pub fn encode_now(probe_result: &ProbeResult) -> MetricRecord {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    encode(probe_result, now)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn probe_result() -> ProbeResult {
        ProbeResult {
            target: "example.com".to_string(),
            url: "https://example.com".to_string(),
            method: "HEAD".to_string(),
            start_time: 1_700_000_000_000_000_000,
            finish_time: 1_700_000_000_042_000_000,
            status_code: 200,
            content_length: 1256,
            body: Bytes::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_encode_schema() {
        let record = encode(&probe_result(), 1_700_000_001_000_000_000);

        assert_eq!(record.measurement, HTTP_CHECK_MEASUREMENT);
        assert_eq!(record.tags["method"], "HEAD");
        assert_eq!(record.tags["server"], "example.com");
        assert_eq!(record.tags["status_code"], "200");
        assert_eq!(record.fields["content_length"], FieldValue::Integer(1256));
        assert_eq!(record.fields["http_response_code"], FieldValue::Integer(200));
        assert_eq!(record.fields["response_time"], FieldValue::Integer(42_000_000));
        assert_eq!(record.timestamp, 1_700_000_001_000_000_000);
    }

    #[test]
    fn test_encode_line() {
        let line = encode(&probe_result(), 1_700_000_001_000_000_000).to_line();
        assert_eq!(
            line,
            "http_check,method=HEAD,server=example.com,status_code=200 \
             content_length=1256i,http_response_code=200i,response_time=42000000i \
             1700000001000000000"
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let result = probe_result();
        let lines: Vec<String> = (0..10).map(|_| encode(&result, 5).to_line()).collect();
        assert!(lines.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_encode_now_stamps_encoding_time() {
        let result = probe_result();
        let record = encode_now(&result);
        assert!(record.timestamp > result.finish_time);
    }
}
