//! Store boundary: everything the output needs from ClickHouse.
//!
//! `HttpStore` talks to a real server over its HTTP interface;
//! `MemoryStore` keeps tables in process and can inject failures.

use chrono::{DateTime, Utc};

use sink_api::{BoxFuture, PluginError};

use crate::schema::{CreateTable, InsertStatement, TableRef};

mod http;
mod memory;

pub use http::HttpStore;
pub use memory::{MemoryStore, MemoryTable};

/// Positional value bound into an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Float64(f64),
    Int64(i64),
    String(String),
    Timestamp(DateTime<Utc>),
}

/// One row of `DESCRIBE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_name: String,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Columnar store the output writes into.
///
/// Implementations must tolerate concurrent calls from several per-table
/// tasks; each `begin` hands out an independent transaction.
pub trait Store: Send + Sync {
    /// Check that the server is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    /// `CREATE DATABASE IF NOT EXISTS`.
    fn create_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<(), PluginError>>;

    /// `CREATE TABLE IF NOT EXISTS`. Must be a no-op for an existing table.
    fn create_table<'a>(&'a self, ddl: &'a CreateTable) -> BoxFuture<'a, Result<(), PluginError>>;

    /// Live columns of a table, `date` included, in declaration order.
    fn describe<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Vec<ColumnDescription>, PluginError>>;

    /// Open a transaction that inserts rows through `insert`.
    fn begin<'a>(
        &'a self,
        insert: &'a InsertStatement,
    ) -> BoxFuture<'a, Result<Box<dyn Transaction>, PluginError>>;
}

/// Insert transaction for one table. Dropping it without `commit`
/// discards every executed row.
pub trait Transaction: Send {
    /// Execute the insert for one row; `values` follow the statement's
    /// column order. A failed row leaves the transaction usable.
    fn exec(&mut self, values: Vec<BindValue>) -> BoxFuture<'_, Result<(), PluginError>>;

    /// Make every successfully executed row visible.
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), PluginError>>;
}
