use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use sink_api::{BoxFuture, PluginError};

use super::{BindValue, ColumnDescription, Store, Transaction};
use crate::normalize::{TS_COLUMN, UPDATED_COLUMN};
use crate::schema::{CreateTable, DATE_COLUMN, InsertStatement, TableRef};

/// One in-memory table: declared columns plus committed rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDescription>,
    pub order_by: Vec<String>,
    pub rows: Vec<BTreeMap<String, BindValue>>,
}

#[derive(Default)]
struct MemoryState {
    unreachable: bool,
    databases: BTreeSet<String>,
    tables: BTreeMap<(String, String), MemoryTable>,
    failing_create: HashSet<String>,
    failing_describe: HashSet<String>,
    failing_commit: HashSet<String>,
    /// `(table, column, value)` combinations whose exec fails.
    rejected: Vec<(String, String, BindValue)>,
}

fn key(table: &TableRef) -> (String, String) {
    (table.database.clone(), table.table.clone())
}

/// In-process `Store`. Behaves like ClickHouse for the statements the
/// output issues and lets callers inject failures per table.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with an I/O error (or recover).
    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.unreachable = !reachable;
    }

    /// Create a table (and its database) with the given `(name, type)` columns.
    pub async fn add_table(&self, table: &TableRef, columns: &[(&str, &str)]) {
        let mut state = self.state.lock().await;
        state.databases.insert(table.database.clone());
        state.tables.insert(
            key(table),
            MemoryTable {
                columns: columns
                    .iter()
                    .map(|(name, t)| ColumnDescription::new(*name, *t))
                    .collect(),
                order_by: Vec::new(),
                rows: Vec::new(),
            },
        );
    }

    pub async fn fail_create_table(&self, table: &str) {
        self.state.lock().await.failing_create.insert(table.to_string());
    }

    pub async fn fail_describe(&self, table: &str) {
        self.state.lock().await.failing_describe.insert(table.to_string());
    }

    pub async fn fail_commit(&self, table: &str) {
        self.state.lock().await.failing_commit.insert(table.to_string());
    }

    /// Fail exec for rows of `table` binding `value` into `column`.
    pub async fn reject_value(&self, table: &str, column: &str, value: BindValue) {
        self.state
            .lock()
            .await
            .rejected
            .push((table.to_string(), column.to_string(), value));
    }

    pub async fn has_database(&self, database: &str) -> bool {
        self.state.lock().await.databases.contains(database)
    }

    pub async fn table(&self, table: &TableRef) -> Option<MemoryTable> {
        self.state.lock().await.tables.get(&key(table)).cloned()
    }

    /// Committed rows of a table; empty when the table does not exist.
    pub async fn rows(&self, table: &TableRef) -> Vec<BTreeMap<String, BindValue>> {
        self.table(table).await.map(|t| t.rows).unwrap_or_default()
    }

    pub async fn table_count(&self) -> usize {
        self.state.lock().await.tables.len()
    }
}

fn unreachable_err() -> PluginError {
    PluginError::io("connection refused")
}

impl Store for MemoryStore {
    fn ping(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(async move {
            if self.state.lock().await.unreachable {
                return Err(unreachable_err());
            }
            Ok(())
        })
    }

    fn create_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.unreachable {
                return Err(unreachable_err());
            }
            state.databases.insert(database.to_string());
            Ok(())
        })
    }

    fn create_table<'a>(&'a self, ddl: &'a CreateTable) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let table = ddl.table();
            if state.unreachable {
                return Err(unreachable_err());
            }
            if state.failing_create.contains(&table.table) {
                return Err(PluginError::schema(format!("cannot create table {table}")));
            }
            if !state.databases.contains(&table.database) {
                return Err(PluginError::schema(format!(
                    "Database {} doesn't exist",
                    table.database
                )));
            }
            if state.tables.contains_key(&key(table)) {
                return Ok(());
            }

            let mut columns = vec![ColumnDescription::new(DATE_COLUMN, "Date")];
            columns.extend(
                ddl.columns()
                    .iter()
                    .map(|c| ColumnDescription::new(c.name.clone(), c.column_type.to_string())),
            );
            columns.push(ColumnDescription::new(TS_COLUMN, "DateTime"));
            columns.push(ColumnDescription::new(UPDATED_COLUMN, "DateTime"));

            state.tables.insert(
                key(table),
                MemoryTable {
                    columns,
                    order_by: ddl.order_by().to_vec(),
                    rows: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn describe<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Vec<ColumnDescription>, PluginError>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            if state.unreachable {
                return Err(unreachable_err());
            }
            if state.failing_describe.contains(&table.table) {
                return Err(PluginError::schema(format!("cannot describe {table}")));
            }
            state
                .tables
                .get(&key(table))
                .map(|t| t.columns.clone())
                .ok_or_else(|| PluginError::schema(format!("Table {table} doesn't exist")))
        })
    }

    fn begin<'a>(
        &'a self,
        insert: &'a InsertStatement,
    ) -> BoxFuture<'a, Result<Box<dyn Transaction>, PluginError>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let table = insert.table();
            if state.unreachable {
                return Err(unreachable_err());
            }
            if !state.tables.contains_key(&key(table)) {
                return Err(PluginError::schema(format!("Table {table} doesn't exist")));
            }
            Ok(Box::new(MemoryTransaction {
                state: Arc::clone(&self.state),
                table: table.clone(),
                columns: insert.columns().iter().map(|(n, _)| n.clone()).collect(),
                pending: Vec::new(),
            }) as Box<dyn Transaction>)
        })
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    table: TableRef,
    columns: Vec<String>,
    pending: Vec<BTreeMap<String, BindValue>>,
}

impl Transaction for MemoryTransaction {
    fn exec(&mut self, values: Vec<BindValue>) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(async move {
            if values.len() != self.columns.len() {
                return Err(PluginError::format_err(format!(
                    "expected {} values, got {}",
                    self.columns.len(),
                    values.len()
                )));
            }
            let row: BTreeMap<String, BindValue> =
                self.columns.iter().cloned().zip(values).collect();

            let state = self.state.lock().await;
            for (table, column, value) in &state.rejected {
                if *table == self.table.table && row.get(column) == Some(value) {
                    return Err(PluginError::format_err(format!(
                        "value {value:?} rejected for column '{column}'"
                    )));
                }
            }
            drop(state);

            self.pending.push(row);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), PluginError>> {
        Box::pin(async move {
            let tx = *self;
            let mut state = tx.state.lock().await;
            if state.unreachable {
                return Err(unreachable_err());
            }
            if state.failing_commit.contains(&tx.table.table) {
                return Err(PluginError::io(format!("commit to {} failed", tx.table)));
            }
            let table = state
                .tables
                .get_mut(&key(&tx.table))
                .ok_or_else(|| PluginError::schema(format!("Table {} doesn't exist", tx.table)))?;
            table.rows.extend(tx.pending);
            Ok(())
        })
    }
}
