//! C entry points shared by sink plugins.
//!
//! A plugin exports `qs_create_metric_sink`, `qs_destroy_metric_sink` and
//! `qs_abi_version`. The sink crosses the boundary as a thin pointer to a
//! `Box<dyn MetricSink>`; a creation error crosses as a thin pointer to a
//! `String`. Host and plugin come from the same workspace build.

use crate::{MetricSink, PluginError};

/// Bump when `MetricSink`, `Metric`, `FieldValue` or `SinkCreateResult`
/// change in a binary-incompatible way.
pub const QS_ABI_VERSION: u32 = 1;

/// Returned by `qs_create_metric_sink`. Exactly one pointer is non-null.
#[repr(C)]
pub struct SinkCreateResult {
    pub sink_ptr: *mut (),
    pub error_ptr: *mut (),
}

// Safety: handed from plugin to host once, at creation time.
unsafe impl Send for SinkCreateResult {}

impl SinkCreateResult {
    pub fn ok(sink: Box<dyn MetricSink>) -> Self {
        // Box<dyn MetricSink> is a fat pointer; box it again to get a thin one.
        let thin: Box<Box<dyn MetricSink>> = Box::new(sink);
        Self {
            sink_ptr: Box::into_raw(thin) as *mut (),
            error_ptr: std::ptr::null_mut(),
        }
    }

    pub fn err(error: &PluginError) -> Self {
        Self {
            sink_ptr: std::ptr::null_mut(),
            error_ptr: Box::into_raw(Box::new(error.to_string())) as *mut (),
        }
    }

    /// Reclaim both pointers. The caller owns whatever comes back.
    ///
    /// # Safety
    /// The result must come from [`SinkCreateResult::ok`] or
    /// [`SinkCreateResult::err`] and must not have been consumed before.
    pub unsafe fn into_result(self) -> Result<Box<dyn MetricSink>, String> {
        if !self.error_ptr.is_null() {
            let error = unsafe { Box::from_raw(self.error_ptr as *mut String) };
            return Err(*error);
        }
        if self.sink_ptr.is_null() {
            return Err("plugin returned neither a sink nor an error".to_string());
        }
        let sink = unsafe { Box::from_raw(self.sink_ptr as *mut Box<dyn MetricSink>) };
        Ok(*sink)
    }
}

/// Drop a sink handed out by [`SinkCreateResult::ok`]. Null is ignored.
///
/// # Safety
/// `sink_ptr` must be null or a `sink_ptr` not yet destroyed.
pub unsafe fn destroy_sink(sink_ptr: *mut ()) {
    if !sink_ptr.is_null() {
        drop(unsafe { Box::from_raw(sink_ptr as *mut Box<dyn MetricSink>) });
    }
}

/// Deserialize plugin config from a JSON byte range.
///
/// # Safety
/// `config_json_ptr` must point to `config_json_len` readable bytes.
pub unsafe fn parse_plugin_config<T: serde::de::DeserializeOwned>(
    config_json_ptr: *const u8,
    config_json_len: usize,
) -> Result<T, PluginError> {
    if config_json_ptr.is_null() {
        return Err(PluginError::config("config pointer is null"));
    }
    let json_bytes = unsafe { std::slice::from_raw_parts(config_json_ptr, config_json_len) };
    let json_str = std::str::from_utf8(json_bytes)
        .map_err(|e| PluginError::config(format!("invalid UTF-8 config: {e}")))?;
    serde_json::from_str(json_str)
        .map_err(|e| PluginError::config(format!("invalid config JSON: {e}")))
}
