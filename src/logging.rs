use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const TARGET: &str = "gif_forge";

/// Filter for the terminal. `RUST_LOG` wins over `--verbose`.
pub fn stderr_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

fn default_directive(verbose: bool) -> String {
    match verbose {
        true => format!("{}=debug", TARGET),
        false => format!("{}=warn", TARGET),
    }
}

/// Installs the global subscriber: a stderr layer, plus an info-level file
/// layer when `log_file` is given. The returned guard flushes the file on
/// drop and must be kept alive until exit.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(stderr_filter(verbose));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let file_name = path.file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("not a file path: {:?}", path)))?;
            std::fs::create_dir_all(dir)?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_filter(EnvFilter::new(format!("{}=info", TARGET)));
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::debug!(verbose, log_file = ?log_file, "logging initialized");
    Ok(guard)
}
