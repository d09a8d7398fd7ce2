//! ClickHouse output for metric batches.
//!
//! Every metric becomes one row in a table named after the metric. A write
//! filters the batch through the allow list, normalizes each metric, groups
//! rows by table, optionally creates missing tables and then inserts every
//! table concurrently in its own transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use sink_api::{BoxFuture, Metric, MetricSink, PluginError, SinkCreateResult, parse_plugin_config};

pub mod allow_list;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod error;
pub mod normalize;
pub mod schema;
pub mod store;
pub mod writer;

pub use allow_list::AllowList;
pub use catalog::SchemaCatalog;
pub use coerce::{ColumnValue, coerce};
pub use config::ClickHouseConfig;
pub use error::{RowError, SinkError};
pub use normalize::{MetricNormalizer, NormalizedRow};
pub use schema::{ColumnType, SchemaDeriver, TableSpec};
pub use store::{BindValue, HttpStore, MemoryStore, Store};
pub use writer::{BatchWriter, RowFailure, TableOutcome, TableReport, WriteReport, bind};

// ════════════════════════════════════════════════════════════════
//  ClickHouseOutput
// ════════════════════════════════════════════════════════════════

pub struct ClickHouseOutput {
    allow_list: AllowList,
    normalizer: MetricNormalizer,
    deriver: SchemaDeriver,
    catalog: Arc<SchemaCatalog>,
    writer: BatchWriter,
    create_table: bool,
}

impl ClickHouseOutput {
    /// Output backed by the ClickHouse HTTP interface.
    pub fn from_config(cfg: ClickHouseConfig) -> Result<Self, SinkError> {
        cfg.validate()?;
        let store = HttpStore::from_config(&cfg).map_err(|e| SinkError::Config(e.to_string()))?;
        Self::with_store(cfg, Arc::new(store))
    }

    /// Output writing through an arbitrary store.
    pub fn with_store(cfg: ClickHouseConfig, store: Arc<dyn Store>) -> Result<Self, SinkError> {
        cfg.validate()?;
        let catalog = Arc::new(SchemaCatalog::new(store, cfg.database.clone()));
        Ok(Self {
            allow_list: AllowList::new(cfg.allow_list.iter().cloned()),
            normalizer: MetricNormalizer::new(&cfg.key_priority),
            deriver: SchemaDeriver::new(&cfg.exclude_keys),
            writer: BatchWriter::new(Arc::clone(&catalog), cfg.max_parallel_tables),
            catalog,
            create_table: cfg.create_table,
        })
    }

    /// Write one batch.
    ///
    /// `Err` means the batch failed before any table was inserted
    /// (unreachable store, database or table DDL). Table-level failures
    /// are reported per table in the returned `WriteReport`.
    pub async fn write(&self, metrics: &[Metric]) -> Result<WriteReport, SinkError> {
        let mut groups: BTreeMap<String, Vec<NormalizedRow>> = BTreeMap::new();
        for metric in metrics.iter().filter(|m| self.allow_list.admit(m.name())) {
            let row = self.normalizer.normalize(metric);
            groups.entry(row.table().to_string()).or_default().push(row);
        }
        tracing::debug!(
            received = metrics.len(),
            admitted = groups.values().map(Vec::len).sum::<usize>(),
            tables = groups.len(),
            "batch filtered"
        );

        if groups.is_empty() {
            return Ok(WriteReport::default());
        }

        self.catalog.ping().await?;
        self.catalog.ensure_database().await?;

        if self.create_table {
            let specs: Vec<TableSpec> = groups
                .values()
                .filter_map(|rows| rows.first())
                .map(|row| self.deriver.derive(row))
                .collect();
            self.catalog.create_if_missing(&specs).await?;
        }

        Ok(self.writer.insert_all(groups).await)
    }
}

impl MetricSink for ClickHouseOutput {
    fn write(&self, metrics: &[Metric]) -> BoxFuture<'_, Result<(), PluginError>> {
        let metrics = metrics.to_vec();
        Box::pin(async move {
            let report = ClickHouseOutput::write(self, &metrics).await?;
            report.into_result()?;
            Ok(())
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Plugin entry points
// ════════════════════════════════════════════════════════════════

/// # Safety
/// `config_json_ptr` must point to `config_json_len` valid UTF-8 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qs_create_metric_sink(
    config_json_ptr: *const u8,
    config_json_len: usize,
) -> SinkCreateResult {
    let cfg: ClickHouseConfig = match unsafe { parse_plugin_config(config_json_ptr, config_json_len) } {
        Ok(c) => c,
        Err(e) => return SinkCreateResult::err(&e),
    };

    match ClickHouseOutput::from_config(cfg) {
        Ok(output) => SinkCreateResult::ok(Box::new(output)),
        Err(e) => SinkCreateResult::err(&PluginError::from(e)),
    }
}

/// # Safety
/// `sink_ptr` must be null or a `sink_ptr` from `qs_create_metric_sink`
/// that was not destroyed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qs_destroy_metric_sink(sink_ptr: *mut ()) {
    unsafe { sink_api::destroy_sink(sink_ptr) }
}

#[unsafe(no_mangle)]
pub extern "C" fn qs_abi_version() -> u32 {
    sink_api::QS_ABI_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_destroys_sink() {
        let raw = br#"{"host":"127.0.0.1","database":"metrics"}"#;
        let res = unsafe { qs_create_metric_sink(raw.as_ptr(), raw.len()) };
        assert!(res.error_ptr.is_null());
        assert!(!res.sink_ptr.is_null());
        unsafe { qs_destroy_metric_sink(res.sink_ptr) };
    }

    #[test]
    fn rejects_bad_database_name() {
        let raw = br#"{"host":"127.0.0.1","database":"bad name"}"#;
        let res = unsafe { qs_create_metric_sink(raw.as_ptr(), raw.len()) };
        let msg = unsafe { res.into_result() }.err().unwrap();
        assert!(msg.contains("invalid identifier"), "{msg}");
    }

    #[test]
    fn reports_abi_version() {
        assert_eq!(qs_abi_version(), sink_api::QS_ABI_VERSION);
    }
}
