use chrono::{DateTime, Utc};
use serde::Deserialize;

use sink_api::{FieldValue, Metric};

use crate::error::RelayError;

/// One metric per input line:
/// `{"name":"cpu","tags":{"host":"a"},"fields":{"usage":42.5},"timestamp":1700000000}`.
#[derive(Deserialize)]
struct RawMetric {
    name: String,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
    /// Unix seconds; the current time when absent.
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Parse one NDJSON line. Tag and field order follows the line.
pub fn parse_line(line: &str) -> Result<Metric, RelayError> {
    let raw: RawMetric =
        serde_json::from_str(line).map_err(|e| RelayError::Input(e.to_string()))?;
    if raw.name.is_empty() {
        return Err(RelayError::Input("metric name is empty".into()));
    }

    let time = match raw.timestamp {
        Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| RelayError::Input(format!("timestamp {secs} out of range")))?,
        None => Utc::now(),
    };

    let mut metric = Metric::new(raw.name, time);
    for (key, value) in raw.tags {
        let value = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        metric = metric.with_tag(key, value);
    }
    for (key, value) in raw.fields {
        metric = metric.with_field(key, FieldValue::from(value));
    }
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_key_order() {
        let m = parse_line(
            r#"{"name":"cpu","tags":{"host":"a","dc":"east"},"fields":{"usage":42.5,"idle":1,"ok":true},"timestamp":1700000000}"#,
        )
        .unwrap();
        assert_eq!(m.name(), "cpu");
        let tags: Vec<&str> = m.tags().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(tags, vec!["host", "dc"]);
        assert_eq!(
            m.fields(),
            &[
                ("usage".to_string(), FieldValue::Float64(42.5)),
                ("idle".to_string(), FieldValue::Int64(1)),
                ("ok".to_string(), FieldValue::Bool(true)),
            ]
        );
        assert_eq!(m.time().timestamp(), 1_700_000_000);
    }

    #[test]
    fn non_string_tags_are_stringified() {
        let m = parse_line(r#"{"name":"disk","tags":{"id":7}}"#).unwrap();
        assert_eq!(m.tags(), &[("id".to_string(), "7".to_string())]);
        assert!(m.fields().is_empty());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(parse_line("{not json"), Err(RelayError::Input(_))));
        assert!(matches!(parse_line(r#"{"tags":{}}"#), Err(RelayError::Input(_))));
        assert!(matches!(parse_line(r#"{"name":""}"#), Err(RelayError::Input(_))));
        assert!(matches!(
            parse_line(r#"{"name":"x","timestamp":9223372036854775807}"#),
            Err(RelayError::Input(_))
        ));
    }
}
