use std::collections::HashMap;

use chrono::{DateTime, Utc};

use sink_api::Metric;

use crate::coerce::{ColumnValue, coerce};

/// Synthetic column holding the metric timestamp.
pub const TS_COLUMN: &str = "ts";
/// Synthetic column holding the time the row was normalized.
pub const UPDATED_COLUMN: &str = "updated";

/// A metric reshaped for one destination table.
///
/// `tags` are ordered by the configured key priority, `fields` keep arrival
/// order. `columns` is what inserts bind from: every tag, every field and
/// the `ts`/`updated` timestamps (which win over a same-named tag or field).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    table: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, ColumnValue)>,
    columns: HashMap<String, ColumnValue>,
}

impl NormalizedRow {
    /// Destination table, equal to the metric name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, ColumnValue)] {
        &self.fields
    }

    pub fn columns(&self) -> &HashMap<String, ColumnValue> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.get(name)
    }
}

/// Turns metrics into `NormalizedRow`s.
#[derive(Debug, Clone, Default)]
pub struct MetricNormalizer {
    /// Tag key → rank. Keys not in the map rank after every listed key.
    priority: HashMap<String, usize>,
}

impl MetricNormalizer {
    pub fn new(key_priority: &[String]) -> Self {
        let mut priority = HashMap::with_capacity(key_priority.len());
        for (rank, key) in key_priority.iter().enumerate() {
            priority.entry(key.clone()).or_insert(rank);
        }
        Self { priority }
    }

    fn rank(&self, key: &str) -> usize {
        self.priority.get(key).copied().unwrap_or(usize::MAX)
    }

    /// Normalize with `updated` set to the current wall clock.
    pub fn normalize(&self, metric: &Metric) -> NormalizedRow {
        self.normalize_at(metric, Utc::now())
    }

    /// Normalize with an explicit `updated` time. Never fails: fields that
    /// cannot be coerced are kept as `0.0`.
    pub fn normalize_at(&self, metric: &Metric, updated: DateTime<Utc>) -> NormalizedRow {
        let mut columns =
            HashMap::with_capacity(metric.tags().len() + metric.fields().len() + 2);

        let mut tags: Vec<(String, String)> = metric.tags().to_vec();
        // sort_by_key is stable: equal ranks keep arrival order.
        tags.sort_by_key(|(key, _)| self.rank(key));
        for (key, value) in &tags {
            columns.insert(key.clone(), ColumnValue::String(value.clone()));
        }

        let mut fields = Vec::with_capacity(metric.fields().len());
        for (key, value) in metric.fields() {
            let coerced = coerce(value).unwrap_or(ColumnValue::Float64(0.0));
            columns.insert(key.clone(), coerced.clone());
            fields.push((key.clone(), coerced));
        }

        columns.insert(TS_COLUMN.to_string(), ColumnValue::Timestamp(metric.time()));
        columns.insert(UPDATED_COLUMN.to_string(), ColumnValue::Timestamp(updated));

        NormalizedRow {
            table: metric.name().to_string(),
            tags,
            fields,
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sink_api::FieldValue;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn keys(row: &NormalizedRow) -> Vec<&str> {
        row.tags().iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn orders_tags_by_priority() {
        let normalizer = MetricNormalizer::new(&["dc".into(), "host".into()]);
        let metric = Metric::new("cpu", at(100))
            .with_tag("host", "a")
            .with_tag("dc", "east")
            .with_field("usage", 42.5);

        let row = normalizer.normalize_at(&metric, at(200));
        assert_eq!(
            row.tags(),
            &[("dc".to_string(), "east".to_string()), ("host".to_string(), "a".to_string())]
        );
        assert_eq!(row.table(), "cpu");
    }

    #[test]
    fn unlisted_tags_follow_in_arrival_order() {
        let normalizer = MetricNormalizer::new(&["host".into()]);
        let metric = Metric::new("disk", at(0))
            .with_tag("path", "/")
            .with_tag("fstype", "ext4")
            .with_tag("host", "a")
            .with_tag("device", "sda1");

        let row = normalizer.normalize_at(&metric, at(0));
        assert_eq!(keys(&row), vec!["host", "path", "fstype", "device"]);
    }

    #[test]
    fn tag_order_is_independent_of_arrival_order() {
        let normalizer = MetricNormalizer::new(&["dc".into(), "rack".into(), "host".into()]);
        let a = Metric::new("cpu", at(0))
            .with_tag("host", "h1")
            .with_tag("rack", "r1")
            .with_tag("dc", "d1");
        let b = Metric::new("cpu", at(0))
            .with_tag("rack", "r2")
            .with_tag("dc", "d2")
            .with_tag("host", "h2");

        let ra = normalizer.normalize_at(&a, at(0));
        let rb = normalizer.normalize_at(&b, at(0));
        assert_eq!(keys(&ra), keys(&rb));
        assert_eq!(keys(&ra), vec!["dc", "rack", "host"]);
    }

    #[test]
    fn columns_cover_tags_fields_and_timestamps() {
        let normalizer = MetricNormalizer::default();
        let metric = Metric::new("mem", at(10))
            .with_tag("host", "a")
            .with_field("used", 10u64)
            .with_field("state", "ok")
            .with_field("ok", true);

        let row = normalizer.normalize_at(&metric, at(20));
        for key in ["host", "used", "state", "ok", TS_COLUMN, UPDATED_COLUMN] {
            assert!(row.column(key).is_some(), "missing column {key}");
        }
        assert_eq!(row.columns().len(), 6);
        assert_eq!(row.column("ok"), Some(&ColumnValue::Float64(1.0)));
        assert_eq!(row.column(TS_COLUMN), Some(&ColumnValue::Timestamp(at(10))));
        assert_eq!(row.column(UPDATED_COLUMN), Some(&ColumnValue::Timestamp(at(20))));
    }

    #[test]
    fn unsupported_fields_are_kept_as_zero() {
        let normalizer = MetricNormalizer::default();
        let metric = Metric::new("proc", at(0))
            .with_field("pids", FieldValue::Array(vec![FieldValue::Int64(1)]))
            .with_field("count", 3i32);

        let row = normalizer.normalize_at(&metric, at(0));
        assert_eq!(
            row.fields(),
            &[
                ("pids".to_string(), ColumnValue::Float64(0.0)),
                ("count".to_string(), ColumnValue::Float64(3.0)),
            ]
        );
        assert_eq!(row.column("pids"), Some(&ColumnValue::Float64(0.0)));
    }

    #[test]
    fn synthetic_columns_win_over_user_keys() {
        let normalizer = MetricNormalizer::default();
        let metric = Metric::new("x", at(5)).with_field("ts", 1.0).with_tag("updated", "no");

        let row = normalizer.normalize_at(&metric, at(6));
        assert_eq!(row.column(TS_COLUMN), Some(&ColumnValue::Timestamp(at(5))));
        assert_eq!(row.column(UPDATED_COLUMN), Some(&ColumnValue::Timestamp(at(6))));
    }
}
