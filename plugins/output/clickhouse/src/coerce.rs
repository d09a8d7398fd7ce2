use chrono::{DateTime, Utc};

use sink_api::FieldValue;

/// Value of one column in a normalized row.
///
/// Fields coerce to `Float64` or `String` only; `Timestamp` is reserved for
/// the synthetic `ts` and `updated` columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Float64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    /// Short name of the runtime kind, used in logs and row errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ColumnValue::Float64(_) => "float",
            ColumnValue::String(_) => "string",
            ColumnValue::Timestamp(_) => "timestamp",
        }
    }
}

/// Map a field value onto one of the two storage kinds.
///
/// Integers of any width, floats and booleans (`true` → 1.0, `false` → 0.0)
/// become `Float64`; strings pass through. Arrays, maps and nulls return
/// `None`. Callers substitute `0.0` for `None`, so the conversion is lossy:
/// an unsupported value is stored as zero and nothing is reported. Integers
/// beyond 2^53 lose precision the same way.
pub fn coerce(value: &FieldValue) -> Option<ColumnValue> {
    match value {
        FieldValue::Int64(v) => Some(ColumnValue::Float64(*v as f64)),
        FieldValue::UInt64(v) => Some(ColumnValue::Float64(*v as f64)),
        FieldValue::Float32(v) => Some(ColumnValue::Float64(f64::from(*v))),
        FieldValue::Float64(v) => Some(ColumnValue::Float64(*v)),
        FieldValue::Bool(v) => Some(ColumnValue::Float64(if *v { 1.0 } else { 0.0 })),
        FieldValue::String(s) => Some(ColumnValue::String(s.clone())),
        FieldValue::Array(_) | FieldValue::Map(_) | FieldValue::Null => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_kinds_become_float() {
        assert_eq!(coerce(&FieldValue::from(-5i8)), Some(ColumnValue::Float64(-5.0)));
        assert_eq!(coerce(&FieldValue::from(42u32)), Some(ColumnValue::Float64(42.0)));
        assert_eq!(coerce(&FieldValue::from(0.5f32)), Some(ColumnValue::Float64(0.5)));
        assert_eq!(coerce(&FieldValue::from(42.5)), Some(ColumnValue::Float64(42.5)));
    }

    #[test]
    fn booleans_become_one_and_zero() {
        assert_eq!(coerce(&FieldValue::Bool(true)), Some(ColumnValue::Float64(1.0)));
        assert_eq!(coerce(&FieldValue::Bool(false)), Some(ColumnValue::Float64(0.0)));
    }

    #[test]
    fn strings_pass_through() {
        assert_eq!(
            coerce(&FieldValue::from("idle")),
            Some(ColumnValue::String("idle".into()))
        );
    }

    #[test]
    fn composites_and_null_are_unsupported() {
        assert_eq!(coerce(&FieldValue::Null), None);
        assert_eq!(coerce(&FieldValue::Array(vec![FieldValue::Int64(1)])), None);
        assert_eq!(
            coerce(&FieldValue::Map(vec![("k".into(), FieldValue::Bool(true))])),
            None
        );
    }
}
