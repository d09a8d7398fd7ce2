use chrono::{DateTime, Utc};

// ════════════════════════════════════════════════════════════════
//  Field Value
// ════════════════════════════════════════════════════════════════

/// Field value as produced by an input.
///
/// Closed set: integer and floating widths are widened on construction
/// (`From<i8>` → `Int64`, `From<f32>` → `Float32`, ...). `Array`, `Map`
/// and `Null` exist because inputs do emit them; outputs decide whether
/// they can store them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(String),
    Array(Vec<FieldValue>),
    Map(Vec<(String, FieldValue)>),
    Null,
}

macro_rules! field_value_from {
    ($variant:ident, $target:ty: $($src:ty),+) => {
        $(
            impl From<$src> for FieldValue {
                fn from(v: $src) -> Self {
                    FieldValue::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

field_value_from!(Int64, i64: i8, i16, i32, i64);
field_value_from!(UInt64, u64: u8, u16, u32, u64);
field_value_from!(Float32, f32: f32);
field_value_from!(Float64, f64: f64);

impl From<isize> for FieldValue {
    fn from(v: isize) -> Self {
        FieldValue::Int64(v as i64)
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        FieldValue::UInt64(v as u64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::UInt64(u)
                } else {
                    FieldValue::Float64(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect(),
            ),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Metric
// ════════════════════════════════════════════════════════════════

/// One measurement: name, ordered string tags, ordered typed fields and a
/// timestamp. Immutable once built; outputs only borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    time: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            time,
        }
    }

    /// Add a tag. A repeated key keeps its first position and takes the new value.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.tags.push((key, value)),
        }
        self
    }

    /// Add a field. A repeated key keeps its first position and takes the new value.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags in arrival order.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Fields in arrival order.
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn widens_integer_and_float_widths() {
        assert_eq!(FieldValue::from(-3i8), FieldValue::Int64(-3));
        assert_eq!(FieldValue::from(7u16), FieldValue::UInt64(7));
        assert_eq!(FieldValue::from(1.5f32), FieldValue::Float32(1.5));
        assert_eq!(FieldValue::from("x"), FieldValue::String("x".into()));
    }

    #[test]
    fn converts_json_values() {
        let v: serde_json::Value = serde_json::json!({"a": [1, -2, 2.5], "b": null});
        let FieldValue::Map(entries) = FieldValue::from(v) else {
            panic!("expected map");
        };
        let a = entries.iter().find(|(k, _)| k == "a").map(|(_, v)| v.clone());
        assert_eq!(
            a,
            Some(FieldValue::Array(vec![
                FieldValue::Int64(1),
                FieldValue::Int64(-2),
                FieldValue::Float64(2.5),
            ]))
        );
        assert_eq!(FieldValue::from(serde_json::json!(u64::MAX)), FieldValue::UInt64(u64::MAX));
    }

    #[test]
    fn repeated_keys_keep_position() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let m = Metric::new("cpu", t)
            .with_tag("host", "a")
            .with_tag("dc", "east")
            .with_tag("host", "b")
            .with_field("usage", 1.0)
            .with_field("usage", 2.0);
        assert_eq!(
            m.tags(),
            &[("host".to_string(), "b".to_string()), ("dc".to_string(), "east".to_string())]
        );
        assert_eq!(m.fields(), &[("usage".to_string(), FieldValue::Float64(2.0))]);
        assert_eq!(m.time(), t);
    }
}
