//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the format named by `LARDER_LOG_FORMAT` (default JSON).
///
/// An unrecognised format falls back to JSON and is reported as a warning once the
/// subscriber is installed. Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let raw = std::env::var(tracing::FORMAT_ENV).ok();
    match tracing::format_from(raw.as_deref()) {
        Ok(format) => tracing::init(format),
        Err(err) => {
            tracing::init(LogFormat::default());
            ::tracing::warn!(error = %err, "ignoring {}; using json logs", tracing::FORMAT_ENV);
        }
    }
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::LogFormat;
