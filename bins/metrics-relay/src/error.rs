#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("invalid input: {0}")]
    Input(String),

    #[error("output: {0}")]
    Output(#[from] output_clickhouse::SinkError),

    #[error("plugin: {0}")]
    Plugin(#[from] sink_api::PluginError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
