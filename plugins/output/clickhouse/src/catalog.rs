use std::sync::Arc;

use crate::error::SinkError;
use crate::schema::{CreateTable, TableRef, TableSchema, TableSpec, check_name};
use crate::store::Store;

/// Database-level DDL and live schema lookups.
pub struct SchemaCatalog {
    store: Arc<dyn Store>,
    database: String,
}

impl SchemaCatalog {
    pub fn new(store: Arc<dyn Store>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn table_ref(&self, table: &str) -> TableRef {
        TableRef::new(self.database.clone(), table)
    }

    pub async fn ping(&self) -> Result<(), SinkError> {
        self.store.ping().await.map_err(SinkError::Connection)
    }

    /// `CREATE DATABASE IF NOT EXISTS` for the configured database.
    pub async fn ensure_database(&self) -> Result<(), SinkError> {
        self.store
            .create_database(&self.database)
            .await
            .map_err(|source| SinkError::CreateDatabase {
                database: self.database.clone(),
                source,
            })?;
        tracing::debug!(database = %self.database, "database ensured");
        Ok(())
    }

    /// Issue `CREATE TABLE IF NOT EXISTS` for every spec, in order.
    /// Existing tables are left untouched; the first failure stops the run.
    pub async fn create_if_missing(&self, specs: &[TableSpec]) -> Result<(), SinkError> {
        for spec in specs {
            check_name(&spec.table, "table")?;
            for column in &spec.columns {
                check_name(&column.name, "column")?;
            }

            let ddl = CreateTable::new(&self.database, spec);
            tracing::debug!(table = %ddl.table(), columns = ddl.columns().len(), "create table if missing");
            self.store
                .create_table(&ddl)
                .await
                .map_err(|source| SinkError::CreateTable {
                    table: spec.table.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Live insertable columns of `table` (`date` excluded).
    pub async fn describe(&self, table: &str) -> Result<TableSchema, SinkError> {
        let table_ref = self.table_ref(table);
        let described = self
            .store
            .describe(&table_ref)
            .await
            .map_err(|source| SinkError::Describe {
                table: table.to_string(),
                source,
            })?;
        Ok(TableSchema::from_described(
            described.into_iter().map(|c| (c.name, c.type_name)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MetricNormalizer;
    use crate::schema::{ColumnType, SchemaDeriver};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use sink_api::Metric;

    fn cpu_spec() -> TableSpec {
        let metric = Metric::new("cpu", Utc.timestamp_opt(0, 0).unwrap())
            .with_tag("host", "a")
            .with_field("usage", 1.5);
        let row = MetricNormalizer::default().normalize(&metric);
        SchemaDeriver::default().derive(&row)
    }

    fn catalog() -> (MemoryStore, SchemaCatalog) {
        let store = MemoryStore::new();
        let catalog = SchemaCatalog::new(Arc::new(store.clone()), "telegraf");
        (store, catalog)
    }

    #[tokio::test]
    async fn creates_database_then_table() {
        let (store, catalog) = catalog();
        catalog.ensure_database().await.unwrap();
        assert!(store.has_database("telegraf").await);

        catalog.create_if_missing(&[cpu_spec()]).await.unwrap();
        let table = store.table(&catalog.table_ref("cpu")).await.unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["date", "host", "usage", "ts", "updated"]);
        assert_eq!(table.order_by, vec!["host".to_string(), "ts".to_string()]);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (store, catalog) = catalog();
        catalog.ensure_database().await.unwrap();
        catalog.create_if_missing(&[cpu_spec()]).await.unwrap();
        let before = store.table(&catalog.table_ref("cpu")).await;

        catalog.create_if_missing(&[cpu_spec()]).await.unwrap();
        assert_eq!(store.table(&catalog.table_ref("cpu")).await, before);
        assert_eq!(store.table_count().await, 1);
    }

    #[tokio::test]
    async fn table_ddl_without_database_fails() {
        let (_store, catalog) = catalog();
        let err = catalog.create_if_missing(&[cpu_spec()]).await.unwrap_err();
        assert!(matches!(err, SinkError::CreateTable { ref table, .. } if table == "cpu"));
    }

    #[tokio::test]
    async fn describe_excludes_date() {
        let (_store, catalog) = catalog();
        catalog.ensure_database().await.unwrap();
        catalog.create_if_missing(&[cpu_spec()]).await.unwrap();

        let schema = catalog.describe("cpu").await.unwrap();
        let names: Vec<&str> = schema.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["host", "ts", "updated", "usage"]);
        assert_eq!(schema.get("host"), Some(&ColumnType::LowCardinalityString));
    }

    #[tokio::test]
    async fn describe_missing_table_fails() {
        let (_store, catalog) = catalog();
        let err = catalog.describe("nope").await.unwrap_err();
        assert!(matches!(err, SinkError::Describe { .. }));
    }

    #[tokio::test]
    async fn unreachable_store_is_a_connection_error() {
        let (store, catalog) = catalog();
        store.set_reachable(false).await;
        assert!(matches!(catalog.ping().await, Err(SinkError::Connection(_))));
    }
}
