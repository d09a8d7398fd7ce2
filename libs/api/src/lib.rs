use std::future::Future;
use std::pin::Pin;

mod error;
mod ffi;
mod metric;

pub use error::{ErrorKind, PluginError};
pub use ffi::{QS_ABI_VERSION, SinkCreateResult, destroy_sink, parse_plugin_config};
pub use metric::{FieldValue, Metric};

/// Boxed `Send` future returned by plugin trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Output Plugin Trait
// ════════════════════════════════════════════════════════════════

/// Output backend for metrics. The host calls `write` with one batch at a
/// time and waits for it before sending the next one.
pub trait MetricSink: Send + Sync {
    /// Persist a batch. `Ok` only when every metric the sink accepted was
    /// committed; partial failures are reported as an error.
    fn write(&self, metrics: &[Metric]) -> BoxFuture<'_, Result<(), PluginError>>;

    /// Release resources. Default: nothing to release.
    fn close(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(async { Ok(()) })
    }
}
