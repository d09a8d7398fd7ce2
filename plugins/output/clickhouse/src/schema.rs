use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::coerce::ColumnValue;
use crate::error::SinkError;
use crate::normalize::{NormalizedRow, TS_COLUMN, UPDATED_COLUMN};
use crate::store::BindValue;

/// Partition helper column, materialized from `ts` by the store.
pub const DATE_COLUMN: &str = "date";

const INDEX_GRANULARITY: u32 = 8192;

// ════════════════════════════════════════════════════════════════
//  Identifiers
// ════════════════════════════════════════════════════════════════

/// Validate a plain ClickHouse identifier (database name).
/// Allowed: `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn validate_identifier(name: &str, context: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(SinkError::InvalidIdentifier(format!("{context}: identifier is empty")));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(SinkError::InvalidIdentifier(format!(
            "{context}: '{name}' must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(SinkError::InvalidIdentifier(format!(
                "{context}: invalid character '{ch}' in '{name}'"
            )));
        }
    }
    Ok(())
}

/// Metric names and tag/field keys are free-form; they only need to be
/// non-empty and NUL-free to survive backtick quoting.
pub fn check_name(name: &str, context: &str) -> Result<(), SinkError> {
    if name.is_empty() {
        return Err(SinkError::InvalidIdentifier(format!("{context}: name is empty")));
    }
    if name.contains('\0') {
        return Err(SinkError::InvalidIdentifier(format!("{context}: name contains NUL")));
    }
    Ok(())
}

/// Backtick-quote an identifier, escaping `\` and `` ` ``.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.database), quote_ident(&self.table))
    }
}

// ════════════════════════════════════════════════════════════════
//  Column types
// ════════════════════════════════════════════════════════════════

/// Declared ClickHouse column type.
///
/// The output itself only declares `Float64`, `String`,
/// `LowCardinality(String)` and the timestamp types; the rest appear when
/// a table was created by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Float64,
    String,
    LowCardinalityString,
    Int32,
    Date,
    DateTime,
    DateTime64(u8),
    Other(String),
}

impl ColumnType {
    /// Parse the `type` column of `DESCRIBE TABLE`.
    pub fn parse(declared: &str) -> Self {
        let declared = declared.trim();
        match declared {
            "Float64" => ColumnType::Float64,
            "String" => ColumnType::String,
            "LowCardinality(String)" => ColumnType::LowCardinalityString,
            "Int32" => ColumnType::Int32,
            "Date" => ColumnType::Date,
            "DateTime" => ColumnType::DateTime,
            _ if declared.starts_with("DateTime(") => ColumnType::DateTime,
            _ if declared.starts_with("DateTime64(") => {
                let args = &declared["DateTime64(".len()..];
                let precision = args
                    .split([',', ')'])
                    .next()
                    .and_then(|p| p.trim().parse::<u8>().ok());
                match precision {
                    Some(p) => ColumnType::DateTime64(p),
                    None => ColumnType::Other(declared.to_string()),
                }
            }
            _ => ColumnType::Other(declared.to_string()),
        }
    }

    /// `String` and `LowCardinality(String)` bind the same way.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::LowCardinalityString)
    }

    pub fn is_time(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::DateTime | ColumnType::DateTime64(_))
    }

    /// Value bound for a declared column that the row does not carry.
    /// `None` for types without a zero default.
    pub fn default_value(&self) -> Option<BindValue> {
        match self {
            ColumnType::String | ColumnType::LowCardinalityString => {
                Some(BindValue::String(String::new()))
            }
            ColumnType::Float64 => Some(BindValue::Float64(0.0)),
            ColumnType::Int32 => Some(BindValue::Int64(0)),
            ColumnType::Date
            | ColumnType::DateTime
            | ColumnType::DateTime64(_)
            | ColumnType::Other(_) => None,
        }
    }

    /// Column type inferred from the runtime kind of a coerced value.
    pub fn for_value(value: &ColumnValue) -> Self {
        match value {
            ColumnValue::Float64(_) => ColumnType::Float64,
            ColumnValue::Timestamp(_) => ColumnType::DateTime,
            ColumnValue::String(_) => ColumnType::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Float64 => f.write_str("Float64"),
            ColumnType::String => f.write_str("String"),
            ColumnType::LowCardinalityString => f.write_str("LowCardinality(String)"),
            ColumnType::Int32 => f.write_str("Int32"),
            ColumnType::Date => f.write_str("Date"),
            ColumnType::DateTime => f.write_str("DateTime"),
            ColumnType::DateTime64(p) => write!(f, "DateTime64({p})"),
            ColumnType::Other(s) => f.write_str(s),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Table schema (bindable columns)
// ════════════════════════════════════════════════════════════════

/// Insertable columns of one table, in lexicographic order.
/// Never contains `date`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: BTreeMap<String, ColumnType>,
}

impl TableSchema {
    /// Build from `(name, declared type)` pairs as returned by `DESCRIBE TABLE`.
    pub fn from_described<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let columns = columns
            .into_iter()
            .filter(|(name, _)| name != DATE_COLUMN)
            .map(|(name, declared)| (name, ColumnType::parse(&declared)))
            .collect();
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnType> {
        self.columns.get(name)
    }

    /// Columns in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnType)> {
        self.columns.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ════════════════════════════════════════════════════════════════
//  Derivation
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Column layout derived from the first row of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: String,
    /// Tag columns (priority order) followed by field columns (arrival order).
    pub columns: Vec<ColumnSpec>,
    /// Tag columns used as the leading part of the sort key.
    pub partition_key: Vec<String>,
}

/// Derives `TableSpec`s from normalized rows.
#[derive(Debug, Clone, Default)]
pub struct SchemaDeriver {
    exclude_keys: HashSet<String>,
}

impl SchemaDeriver {
    pub fn new(exclude_keys: &[String]) -> Self {
        Self {
            exclude_keys: exclude_keys.iter().cloned().collect(),
        }
    }

    /// Tags become `LowCardinality(String)`, fields `Float64` or `String`
    /// depending on the runtime kind of this row's value. Later rows never
    /// change the result. `date`, `ts`, `updated` and empty keys are
    /// skipped; a field sharing a tag's key is declared once, as the tag.
    pub fn derive(&self, row: &NormalizedRow) -> TableSpec {
        let mut declared: HashSet<&str> = [DATE_COLUMN, TS_COLUMN, UPDATED_COLUMN, ""]
            .into_iter()
            .collect();
        let mut columns = Vec::with_capacity(row.tags().len() + row.fields().len());
        let mut partition_key = Vec::new();

        for (key, _) in row.tags() {
            if !declared.insert(key.as_str()) {
                continue;
            }
            columns.push(ColumnSpec::new(key.clone(), ColumnType::LowCardinalityString));
            if !self.exclude_keys.contains(key) {
                partition_key.push(key.clone());
            }
        }

        for (key, value) in row.fields() {
            if !declared.insert(key.as_str()) {
                continue;
            }
            columns.push(ColumnSpec::new(key.clone(), ColumnType::for_value(value)));
        }

        TableSpec {
            table: row.table().to_string(),
            columns,
            partition_key,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Statements
// ════════════════════════════════════════════════════════════════

/// `CREATE TABLE IF NOT EXISTS` for a derived spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    table: TableRef,
    columns: Vec<ColumnSpec>,
    order_by: Vec<String>,
}

impl CreateTable {
    pub fn new(database: &str, spec: &TableSpec) -> Self {
        let mut order_by = spec.partition_key.clone();
        order_by.push(TS_COLUMN.to_string());
        Self {
            table: TableRef::new(database, spec.table.clone()),
            columns: spec.columns.clone(),
            order_by,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Tag and field columns; `date`, `ts` and `updated` are implied.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Sort key: partition columns followed by `ts`.
    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    pub fn to_sql(&self) -> String {
        let ts = quote_ident(TS_COLUMN);
        let mut cols = format!(
            "    {} Date DEFAULT toDate({ts})",
            quote_ident(DATE_COLUMN)
        );
        for column in &self.columns {
            cols.push_str(",\n    ");
            cols.push_str(&quote_ident(&column.name));
            cols.push(' ');
            cols.push_str(&column.column_type.to_string());
        }
        cols.push_str(&format!(",\n    {ts} DateTime"));
        cols.push_str(&format!(
            ",\n    {} DateTime DEFAULT now()",
            quote_ident(UPDATED_COLUMN)
        ));

        let order_by: Vec<String> = self.order_by.iter().map(|c| quote_ident(c)).collect();

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{cols}\n) ENGINE = MergeTree()\n",
            self.table
        );
        ddl.push_str(&format!("PARTITION BY toYYYYMM({})\n", quote_ident(DATE_COLUMN)));
        ddl.push_str(&format!("ORDER BY ({})\n", order_by.join(", ")));
        ddl.push_str(&format!("SETTINGS index_granularity = {INDEX_GRANULARITY}"));
        ddl
    }
}

/// Insert against a fixed column order. Rows are bound positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    table: TableRef,
    columns: Vec<(String, ColumnType)>,
}

impl InsertStatement {
    pub fn new(table: TableRef, schema: &TableSchema) -> Self {
        let columns = schema
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect();
        Self { table, columns }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn to_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|(n, _)| quote_ident(n)).collect();
        format!("INSERT INTO {} ({}) FORMAT JSONEachRow", self.table, names.join(", "))
    }
}
