use std::collections::BTreeMap;
use std::fmt;

/// A field value in a line-protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    String(String),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

/// One time-series point. Tags and fields are kept sorted by key so the same
/// record always renders to the same line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Unix nanoseconds.
    pub timestamp: i64,
}

impl MetricRecord {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

fn escape(out: &mut fmt::Formatter<'_>, raw: &str, special: &[char]) -> fmt::Result {
    for c in raw.chars() {
        if special.contains(&c) {
            out.write_str("\\")?;
        }
        write!(out, "{c}")?;
    }
    Ok(())
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];
const STRING_SPECIAL: &[char] = &['"', '\\'];

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::String(v) => {
                f.write_str("\"")?;
                escape(f, v, STRING_SPECIAL)?;
                f.write_str("\"")
            }
        }
    }
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        escape(f, &self.measurement, MEASUREMENT_SPECIAL)?;

        // Line protocol has no representation for an empty tag value.
        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            f.write_str(",")?;
            escape(f, key, KEY_SPECIAL)?;
            f.write_str("=")?;
            escape(f, value, KEY_SPECIAL)?;
        }

        for (i, (key, value)) in self.fields.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { "," })?;
            escape(f, key, KEY_SPECIAL)?;
            write!(f, "={value}")?;
        }

        write!(f, " {}", self.timestamp)
    }
}
