//! Logging setup. Process-wide state is confined to this one call at
//! entry; everywhere else takes a `tracing::Span`/target, not a global.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Guard returned by [`init`]; dropping it flushes the non-blocking file
/// appender. Must be held for the life of `main`.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: &LoggingConfig, verbosity: u8) -> LoggingGuard {
    let base_level = match verbosity {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nwws_relay={base_level},{base_level}")));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let file_guard = match &config.file {
        Some(path) => {
            let dir = std::path::Path::new(path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "nwws-relay.log".to_string());
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            if config.structured || config.format == LogFormat::Json {
                builder.json().with_writer(non_blocking).init();
            } else {
                builder.with_writer(non_blocking).init();
            }
            Some(guard)
        }
        None => {
            if config.structured || config.format == LogFormat::Json {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
    };

    LoggingGuard {
        _file_guard: file_guard,
    }
}
