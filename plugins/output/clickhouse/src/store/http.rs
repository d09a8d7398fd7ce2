use std::time::Duration;

use chrono::{DateTime, Utc};

use sink_api::{BoxFuture, PluginError};

use super::{BindValue, ColumnDescription, Store, Transaction};
use crate::config::ClickHouseConfig;
use crate::schema::{ColumnType, CreateTable, InsertStatement, TableRef, quote_ident};

/// ClickHouse over the HTTP interface.
///
/// `reqwest::Client` pools connections, so concurrent per-table tasks each
/// get their own connection. ClickHouse has no multi-statement transactions
/// over HTTP: a transaction buffers rows as `JSONEachRow` and ships them in
/// a single `INSERT` on commit.
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl HttpStore {
    pub fn from_config(cfg: &ClickHouseConfig) -> Result<Self, PluginError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(Duration::from_secs(cfg.write_timeout_secs))
            .build()
            .map_err(|e| PluginError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }

    /// Execute a SQL statement (DDL / DESCRIBE). Body = SQL text.
    async fn exec(&self, sql: &str) -> Result<String, PluginError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[("user", self.user.as_str()), ("password", self.password.as_str())])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| PluginError::io(format!("CH request: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| PluginError::io(format!("CH read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(PluginError::io(format!("CH {status}: {}", body.trim_end())))
        }
    }
}

impl Store for HttpStore {
    fn ping(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(format!("{}/ping", self.base_url))
                .send()
                .await
                .map_err(|e| PluginError::io(format!("CH ping: {e}")))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(PluginError::io(format!("CH ping: {}", resp.status())))
            }
        })
    }

    fn create_database<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(async move {
            self.exec(&format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(database)))
                .await?;
            Ok(())
        })
    }

    fn create_table<'a>(&'a self, ddl: &'a CreateTable) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(async move {
            self.exec(&ddl.to_sql()).await?;
            Ok(())
        })
    }

    fn describe<'a>(
        &'a self,
        table: &'a TableRef,
    ) -> BoxFuture<'a, Result<Vec<ColumnDescription>, PluginError>> {
        Box::pin(async move {
            let body = self.exec(&format!("DESCRIBE TABLE {table} FORMAT JSONEachRow")).await?;
            parse_describe(&body)
        })
    }

    fn begin<'a>(
        &'a self,
        insert: &'a InsertStatement,
    ) -> BoxFuture<'a, Result<Box<dyn Transaction>, PluginError>> {
        Box::pin(async move {
            let tx = HttpTransaction {
                http: self.http.clone(),
                base_url: self.base_url.clone(),
                user: self.user.clone(),
                password: self.password.clone(),
                insert_sql: insert.to_sql(),
                columns: insert.columns().to_vec(),
                body: String::new(),
                rows: 0,
            };
            Ok(Box::new(tx) as Box<dyn Transaction>)
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Transaction
// ════════════════════════════════════════════════════════════════

struct HttpTransaction {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    insert_sql: String,
    columns: Vec<(String, ColumnType)>,
    /// NDJSON rows accumulated so far.
    body: String,
    rows: usize,
}

impl HttpTransaction {
    fn push_row(&mut self, values: Vec<BindValue>) -> Result<(), PluginError> {
        self.body.push_str(&encode_row(&self.columns, values)?);
        self.body.push('\n');
        self.rows += 1;
        Ok(())
    }
}

impl Transaction for HttpTransaction {
    fn exec(&mut self, values: Vec<BindValue>) -> BoxFuture<'_, Result<(), PluginError>> {
        let result = self.push_row(values);
        Box::pin(async move { result })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), PluginError>> {
        Box::pin(async move {
            let tx = *self;
            if tx.rows == 0 {
                return Ok(());
            }
            let params = [
                ("user", tx.user.as_str()),
                ("password", tx.password.as_str()),
                ("query", tx.insert_sql.as_str()),
            ];
            let resp = tx
                .http
                .post(&tx.base_url)
                .query(&params)
                .body(tx.body)
                .send()
                .await
                .map_err(|e| PluginError::io(format!("CH insert: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = resp.text().await.map_err(|e| PluginError::io(format!("CH read: {e}")))?;
                Err(PluginError::io(format!("CH {status}: {}", body.trim_end())))
            }
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Encoding helpers
// ════════════════════════════════════════════════════════════════

#[derive(serde::Deserialize)]
struct DescribeRow {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

fn parse_describe(body: &str) -> Result<Vec<ColumnDescription>, PluginError> {
    let mut columns = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let row: DescribeRow = serde_json::from_str(line)
            .map_err(|e| PluginError::format_err(format!("parse DESCRIBE row: {e}")))?;
        columns.push(ColumnDescription::new(row.name, row.type_name));
    }
    Ok(columns)
}

/// One `JSONEachRow` object for `values` bound against `columns`.
fn encode_row(columns: &[(String, ColumnType)], values: Vec<BindValue>) -> Result<String, PluginError> {
    if values.len() != columns.len() {
        return Err(PluginError::format_err(format!(
            "expected {} values, got {}",
            columns.len(),
            values.len()
        )));
    }
    let mut row = serde_json::Map::with_capacity(columns.len());
    for ((name, column_type), value) in columns.iter().zip(values) {
        row.insert(name.clone(), encode_value(name, column_type, value)?);
    }
    Ok(serde_json::Value::Object(row).to_string())
}

fn encode_value(
    column: &str,
    column_type: &ColumnType,
    value: BindValue,
) -> Result<serde_json::Value, PluginError> {
    match value {
        BindValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| PluginError::format_err(format!("column '{column}': non-finite value {f}"))),
        BindValue::Int64(i) => Ok(serde_json::Value::Number(i.into())),
        BindValue::String(s) => Ok(serde_json::Value::String(s)),
        BindValue::Timestamp(t) => Ok(encode_timestamp(column_type, t)),
    }
}

/// `DateTime` takes Unix seconds, `DateTime64(p)` a `secs.frac` string with
/// `p` fractional digits, `Date` a `YYYY-MM-DD` string.
fn encode_timestamp(column_type: &ColumnType, t: DateTime<Utc>) -> serde_json::Value {
    match column_type {
        ColumnType::Date => serde_json::Value::String(t.format("%Y-%m-%d").to_string()),
        ColumnType::DateTime64(precision) if *precision > 0 => {
            let p = u32::from((*precision).min(9));
            // Signed ticks of 10^-p seconds, truncated toward zero.
            let nanos = i128::from(t.timestamp()) * 1_000_000_000
                + i128::from(t.timestamp_subsec_nanos());
            let ticks = nanos / 10i128.pow(9 - p);
            let unit = 10u128.pow(p);
            let abs = ticks.unsigned_abs();
            serde_json::Value::String(format!(
                "{sign}{secs}.{frac:0width$}",
                sign = if ticks < 0 { "-" } else { "" },
                secs = abs / unit,
                frac = abs % unit,
                width = p as usize
            ))
        }
        _ => serde_json::Value::Number(t.timestamp().into()),
    }
}
