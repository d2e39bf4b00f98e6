use rowsync_config::Environment;
use std::io::Error;
use std::io::Write;
use std::sync::OnceLock;
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::PanicHookInfo,
    sync::Once,
};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// JSON field name identifying the operator instance in logs.
const INSTANCE_KEY_IN_LOG: &str = "instance";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Log flusher handle for ensuring logs are written before shutdown.
///
/// Production mode returns a [`WorkerGuard`] that must be kept alive until the process exits.
#[must_use]
pub enum LogFlusher {
    /// Production flusher that ensures logs are written to files.
    Flusher(WorkerGuard),
    /// Development flusher that doesn't require explicit flushing.
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for test environments.
///
/// Call once at the beginning of tests. Set `ENABLE_TRACING=1` to view tracing output:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an environment the default is prod, which logs to files instead of the terminal.
            Environment::Dev.set();
            match init_tracing("test") {
                // Dev tracing never buffers, nothing to keep alive.
                Ok(_log_flusher) => {}
                Err(err) => eprintln!("failed to initialize tracing for tests: {err}"),
            }
        }
    });
}

/// Global instance name storage.
static INSTANCE: OnceLock<String> = OnceLock::new();

/// Sets the instance name injected into every structured log entry.
///
/// Only the first call has an effect.
pub fn set_global_instance(instance: String) {
    let _ = INSTANCE.set(instance);
}

/// Returns the instance name set by [`set_global_instance`].
pub fn get_global_instance() -> Option<&'static str> {
    INSTANCE.get().map(|s| s.as_str())
}

/// Adds `key: value` to a single JSON log line unless the key is already present.
///
/// Returns `None` when the line is not a JSON object or nothing was added.
fn inject_field(line: &str, key: &str, value: &str) -> Option<String> {
    let serde_json::Value::Object(mut map) = serde_json::from_str::<serde_json::Value>(line).ok()?
    else {
        return None;
    };

    if map.contains_key(key) {
        return None;
    }

    map.insert(
        key.to_string(),
        serde_json::Value::String(value.to_string()),
    );

    let modified = serde_json::to_string(&map).ok()?;

    // Preserve trailing newline if present
    if line.ends_with('\n') {
        Some(format!("{modified}\n"))
    } else {
        Some(modified)
    }
}

/// Writer wrapper that injects the instance field into JSON log entries.
struct InstanceInjectingWriter<W> {
    inner: W,
}

impl<W> InstanceInjectingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Write for InstanceInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(instance) = get_global_instance()
            && let Ok(line) = std::str::from_utf8(buf)
            && let Some(output) = inject_field(line, INSTANCE_KEY_IN_LOG, instance)
        {
            // Report the original length, the caller only knows about its own buffer.
            self.inner.write_all(output.as_bytes())?;
            return Ok(buf.len());
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for the application.
///
/// Production and staging log JSON to rotating daily files, development logs to the console.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_instance(app_name, None)
}

/// Like [`init_tracing`] but tags every production log entry with an instance name.
pub fn init_tracing_with_instance(
    app_name: &str,
    instance: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(instance) = instance {
        set_global_instance(instance);
    }

    // Forward records emitted through the `log` crate by dependencies.
    LogTracer::init()?;

    let is_prod = Environment::load()?.is_prod();

    // Set the default log level to `info` if not specified in the `RUST_LOG` environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(filter, app_name)?
    } else {
        configure_dev_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn configure_prod_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let filename_suffix = "log";
    let log_dir = "logs";

    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix(filename_suffix)
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build(log_dir)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || InstanceInjectingWriter::new(file_appender.make_writer()))
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Routes panics through tracing before running the previous hook.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        payload.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_instance_into_json_lines() {
        let line = "{\"level\":\"INFO\",\"message\":\"row written\"}\n";

        let output = inject_field(line, INSTANCE_KEY_IN_LOG, "operator-0").unwrap();
        assert!(output.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["instance"], "operator-0");
        assert_eq!(value["message"], "row written");
    }

    #[test]
    fn keeps_existing_field_and_non_json_lines() {
        let line = "{\"instance\":\"other\"}";
        assert!(inject_field(line, INSTANCE_KEY_IN_LOG, "operator-0").is_none());

        assert!(inject_field("plain text", INSTANCE_KEY_IN_LOG, "operator-0").is_none());
        assert!(inject_field("[1,2]", INSTANCE_KEY_IN_LOG, "operator-0").is_none());
    }

    #[test]
    fn writer_passes_through_without_instance() {
        let mut buffer = Vec::new();
        let mut writer = InstanceInjectingWriter::new(&mut buffer);

        let written = writer.write(b"{\"message\":\"hello\"}").unwrap();
        assert_eq!(written, 19);
        assert_eq!(buffer, b"{\"message\":\"hello\"}");
    }
}
