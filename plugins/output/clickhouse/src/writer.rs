use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::catalog::SchemaCatalog;
use crate::coerce::ColumnValue;
use crate::error::{RowError, SinkError};
use crate::normalize::NormalizedRow;
use crate::schema::{ColumnType, InsertStatement, check_name};
use crate::store::BindValue;

// ════════════════════════════════════════════════════════════════
//  Reports
// ════════════════════════════════════════════════════════════════

/// A row that was not inserted, by its position in the table's group.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub index: usize,
    pub error: RowError,
}

/// Result of a committed table unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableOutcome {
    pub inserted: usize,
    pub skipped: Vec<RowFailure>,
}

#[derive(Debug)]
pub struct TableReport {
    pub table: String,
    pub result: Result<TableOutcome, SinkError>,
}

/// Per-table results of one batch, ordered by table name.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub tables: Vec<TableReport>,
}

impl WriteReport {
    pub fn is_success(&self) -> bool {
        self.tables.iter().all(|t| t.result.is_ok())
    }

    /// Rows committed across every successful table.
    pub fn inserted(&self) -> usize {
        self.tables
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .map(|o| o.inserted)
            .sum()
    }

    /// Rows skipped inside otherwise successful tables.
    pub fn skipped(&self) -> usize {
        self.tables
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .map(|o| o.skipped.len())
            .sum()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.result.is_err())
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Collapse into a single result; any failed table fails the batch.
    pub fn into_result(self) -> Result<(), SinkError> {
        let total = self.tables.len();
        let failures: Vec<String> = self
            .tables
            .into_iter()
            .filter_map(|t| t.result.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(SinkError::PartialWrite {
            failed: failures.len(),
            total,
            summary: failures.join("; "),
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Binding
// ════════════════════════════════════════════════════════════════

/// Value to bind for a declared column given the row's value (if any).
///
/// Floats bind into `Float64` as is, into string columns as their decimal
/// text and into `Int32` when integral and in range. Strings bind into
/// string columns only, timestamps into time columns only. A missing value
/// takes the type's default.
pub fn bind(
    column: &str,
    declared: &ColumnType,
    value: Option<&ColumnValue>,
) -> Result<BindValue, RowError> {
    let Some(value) = value else {
        return declared.default_value().ok_or_else(|| RowError::MissingDefault {
            column: column.to_string(),
            declared: declared.to_string(),
        });
    };

    match (declared, value) {
        (ColumnType::Float64, ColumnValue::Float64(f)) if !f.is_finite() => Err(RowError::NonFinite {
            column: column.to_string(),
            value: f.to_string(),
        }),
        (ColumnType::Float64, ColumnValue::Float64(f)) => Ok(BindValue::Float64(*f)),
        (t, ColumnValue::Float64(f)) if t.is_string_like() => Ok(BindValue::String(f.to_string())),
        (ColumnType::Int32, ColumnValue::Float64(f))
            if f.fract() == 0.0 && *f >= f64::from(i32::MIN) && *f <= f64::from(i32::MAX) =>
        {
            Ok(BindValue::Int64(*f as i64))
        }
        (t, ColumnValue::String(s)) if t.is_string_like() => Ok(BindValue::String(s.clone())),
        (t, ColumnValue::Timestamp(ts)) if t.is_time() => Ok(BindValue::Timestamp(*ts)),
        (t, v) => Err(RowError::TypeConflict {
            column: column.to_string(),
            declared: t.to_string(),
            value: v.kind_name(),
        }),
    }
}

// ════════════════════════════════════════════════════════════════
//  BatchWriter
// ════════════════════════════════════════════════════════════════

/// Inserts grouped rows, one concurrent unit per table.
///
/// Each unit describes the live table, binds every row against it and
/// commits once. At most `max_parallel` units talk to the store at a time.
pub struct BatchWriter {
    catalog: Arc<SchemaCatalog>,
    permits: Arc<Semaphore>,
}

impl BatchWriter {
    pub fn new(catalog: Arc<SchemaCatalog>, max_parallel: usize) -> Self {
        Self {
            catalog,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Insert every group and wait for all of them. A failing table never
    /// affects the others.
    pub async fn insert_all(&self, groups: BTreeMap<String, Vec<NormalizedRow>>) -> WriteReport {
        let mut handles: Vec<(String, JoinHandle<Result<TableOutcome, SinkError>>)> =
            Vec::with_capacity(groups.len());

        for (table, rows) in groups {
            let catalog = Arc::clone(&self.catalog);
            let permits = Arc::clone(&self.permits);
            let name = table.clone();
            handles.push((
                table,
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.map_err(|e| {
                        SinkError::TaskAborted {
                            table: name.clone(),
                            detail: e.to_string(),
                        }
                    })?;
                    insert_table(&catalog, &name, rows).await
                }),
            ));
        }

        let mut report = WriteReport::default();
        for (table, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SinkError::TaskAborted {
                    table: table.clone(),
                    detail: e.to_string(),
                }),
            };
            match &result {
                Ok(outcome) => tracing::debug!(
                    table = %table,
                    inserted = outcome.inserted,
                    skipped = outcome.skipped.len(),
                    "table committed"
                ),
                Err(e) => tracing::error!(table = %table, error = %e, "table insert failed"),
            }
            report.tables.push(TableReport { table, result });
        }
        report
    }
}

/// One table unit: describe → begin → exec per row → commit.
async fn insert_table(
    catalog: &SchemaCatalog,
    table: &str,
    rows: Vec<NormalizedRow>,
) -> Result<TableOutcome, SinkError> {
    check_name(table, "table")?;
    let schema = catalog.describe(table).await?;
    if schema.is_empty() {
        return Err(SinkError::NoColumns {
            table: table.to_string(),
        });
    }

    let insert = InsertStatement::new(catalog.table_ref(table), &schema);
    let mut tx = catalog
        .store()
        .begin(&insert)
        .await
        .map_err(|source| SinkError::Begin {
            table: table.to_string(),
            source,
        })?;

    let mut outcome = TableOutcome::default();
    for (index, row) in rows.iter().enumerate() {
        let values: Result<Vec<BindValue>, RowError> = insert
            .columns()
            .iter()
            .map(|(column, declared)| bind(column, declared, row.column(column)))
            .collect();

        let result = match values {
            Ok(values) => tx.exec(values).await.map_err(RowError::Exec),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => outcome.inserted += 1,
            Err(error) => {
                tracing::warn!(table = %table, row = index, error = %error, "row skipped");
                outcome.skipped.push(RowFailure { index, error });
            }
        }
    }

    tx.commit().await.map_err(|source| SinkError::Commit {
        table: table.to_string(),
        source,
    })?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sink_api::PluginError;

    #[test]
    fn float_binds_by_declared_type() {
        let v = ColumnValue::Float64(42.0);
        assert_eq!(bind("v", &ColumnType::Float64, Some(&v)), Ok(BindValue::Float64(42.0)));
        assert_eq!(bind("v", &ColumnType::String, Some(&v)), Ok(BindValue::String("42".into())));
        assert_eq!(
            bind("v", &ColumnType::LowCardinalityString, Some(&ColumnValue::Float64(0.5))),
            Ok(BindValue::String("0.5".into()))
        );
        assert_eq!(bind("v", &ColumnType::Int32, Some(&v)), Ok(BindValue::Int64(42)));
    }

    #[test]
    fn non_integral_or_out_of_range_float_conflicts_with_int32() {
        for f in [1.5, 1e12] {
            let err = bind("v", &ColumnType::Int32, Some(&ColumnValue::Float64(f))).unwrap_err();
            assert!(matches!(err, RowError::TypeConflict { .. }));
        }
    }

    #[test]
    fn non_finite_float_is_rejected_by_float64() {
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = bind("v", &ColumnType::Float64, Some(&ColumnValue::Float64(f))).unwrap_err();
            assert!(matches!(err, RowError::NonFinite { ref column, .. } if column == "v"));
        }
        assert_eq!(
            bind("v", &ColumnType::String, Some(&ColumnValue::Float64(f64::INFINITY))),
            Ok(BindValue::String("inf".into()))
        );
    }

    #[test]
    fn string_into_numeric_column_conflicts() {
        let err = bind("usage", &ColumnType::Float64, Some(&ColumnValue::String("busy".into())))
            .unwrap_err();
        assert_eq!(
            err,
            RowError::TypeConflict {
                column: "usage".into(),
                declared: "Float64".into(),
                value: "string",
            }
        );
    }

    #[test]
    fn timestamps_bind_into_time_columns_only() {
        let t = ColumnValue::Timestamp(Utc.timestamp_opt(10, 0).unwrap());
        assert!(bind("ts", &ColumnType::DateTime, Some(&t)).is_ok());
        assert!(bind("ts", &ColumnType::DateTime64(3), Some(&t)).is_ok());
        assert!(bind("ts", &ColumnType::String, Some(&t)).is_err());
    }

    #[test]
    fn missing_values_take_defaults() {
        assert_eq!(bind("x", &ColumnType::Float64, None), Ok(BindValue::Float64(0.0)));
        assert_eq!(bind("x", &ColumnType::String, None), Ok(BindValue::String(String::new())));
        assert_eq!(bind("x", &ColumnType::Int32, None), Ok(BindValue::Int64(0)));
        assert_eq!(
            bind("x", &ColumnType::DateTime, None),
            Err(RowError::MissingDefault {
                column: "x".into(),
                declared: "DateTime".into(),
            })
        );
    }

    #[test]
    fn report_collapses_failures() {
        let report = WriteReport {
            tables: vec![
                TableReport {
                    table: "cpu".into(),
                    result: Ok(TableOutcome { inserted: 2, skipped: vec![] }),
                },
                TableReport {
                    table: "mem".into(),
                    result: Err(SinkError::Commit {
                        table: "mem".into(),
                        source: PluginError::io("boom"),
                    }),
                },
            ],
        };
        assert!(!report.is_success());
        assert_eq!(report.inserted(), 2);
        assert_eq!(report.failed_tables(), vec!["mem"]);

        match report.into_result() {
            Err(SinkError::PartialWrite { failed, total, summary }) => {
                assert_eq!((failed, total), (1, 2));
                assert!(summary.contains("commit 'mem'"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_report_is_success() {
        let report = WriteReport::default();
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }
}
