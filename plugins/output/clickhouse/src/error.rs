use sink_api::{ErrorKind, PluginError};

/// Batch- and table-level failures of the ClickHouse output.
///
/// Batch-level variants (`Connection`, `CreateDatabase`, `CreateTable`)
/// fail the whole `write` call. Table-level variants (`Describe`, `Begin`,
/// `Commit`, ...) fail one table's unit and end up in its `TableReport`.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("config: {0}")]
    Config(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("store unreachable: {0}")]
    Connection(#[source] PluginError),

    #[error("create database '{database}': {source}")]
    CreateDatabase { database: String, source: PluginError },

    #[error("create table '{table}': {source}")]
    CreateTable { table: String, source: PluginError },

    #[error("describe table '{table}': {source}")]
    Describe { table: String, source: PluginError },

    #[error("table '{table}' has no insertable columns")]
    NoColumns { table: String },

    #[error("begin insert into '{table}': {source}")]
    Begin { table: String, source: PluginError },

    #[error("commit '{table}': {source}")]
    Commit { table: String, source: PluginError },

    #[error("insert task for '{table}' aborted: {detail}")]
    TaskAborted { table: String, detail: String },

    #[error("{failed} of {total} tables failed: {summary}")]
    PartialWrite { failed: usize, total: usize, summary: String },
}

impl SinkError {
    /// Error category as seen by the plugin host.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Config(_) | SinkError::InvalidIdentifier(_) => ErrorKind::Config,
            SinkError::Connection(_) | SinkError::PartialWrite { .. } => ErrorKind::Io,
            SinkError::CreateDatabase { source, .. }
            | SinkError::CreateTable { source, .. }
            | SinkError::Describe { source, .. }
            | SinkError::Begin { source, .. }
            | SinkError::Commit { source, .. } => source.kind(),
            SinkError::NoColumns { .. } => ErrorKind::Schema,
            SinkError::TaskAborted { .. } => ErrorKind::Logic,
        }
    }
}

impl From<SinkError> for PluginError {
    fn from(e: SinkError) -> Self {
        let message = e.to_string();
        match e.kind() {
            ErrorKind::Config => PluginError::config(message),
            ErrorKind::Io => PluginError::io(message),
            ErrorKind::Format => PluginError::format_err(message),
            ErrorKind::Schema => PluginError::schema(message),
            ErrorKind::Logic => PluginError::new(message),
        }
    }
}

/// Why a single row was skipped. Never fails the table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("column '{column}' is {declared} but the row holds a {value} value")]
    TypeConflict {
        column: String,
        declared: String,
        value: &'static str,
    },

    #[error("column '{column}' ({declared}) is missing from the row and has no default")]
    MissingDefault { column: String, declared: String },

    #[error("column '{column}' is Float64 but the row holds {value}")]
    NonFinite { column: String, value: String },

    #[error("exec: {0}")]
    Exec(PluginError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_errors_keep_store_kind() {
        let e = SinkError::Commit {
            table: "cpu".into(),
            source: PluginError::io("timeout"),
        };
        assert_eq!(e.kind(), ErrorKind::Io);
        let plugin: PluginError = e.into();
        assert_eq!(plugin.kind(), ErrorKind::Io);
        assert_eq!(plugin.message(), "commit 'cpu': timeout");
    }

    #[test]
    fn config_errors_map_to_config_kind() {
        let plugin: PluginError = SinkError::InvalidIdentifier("x y".into()).into();
        assert_eq!(plugin.kind(), ErrorKind::Config);
    }
}
