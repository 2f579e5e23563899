//! Logging setup (ambient stack): a stdout layer for interactive use, a
//! daily-rotated file layer, and an optional syslog layer, all behind one
//! `tracing-subscriber` registry filtered by `RUST_LOG`/the config's
//! `level` field.

use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Keeps the rotating file writer's background flush thread alive; must
/// be held for the lifetime of the process.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let file_appender = tracing_appender::rolling::daily(&config.directory, "frippyd.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let subscriber = Registry::default().with(filter).with(stdout_layer).with(file_layer);

    if config.syslog {
        match syslog::unix(syslog::Formatter3164::default()) {
            Ok(logger) => {
                let shared = Arc::new(Mutex::new(logger));
                let syslog_layer = tracing_subscriber::fmt::layer()
                    .with_writer(move || SyslogWriter { inner: shared.clone() })
                    .with_ansi(false)
                    .without_time();
                tracing::subscriber::set_global_default(subscriber.with(syslog_layer))
                    .expect("global subscriber already set");
            }
            Err(e) => {
                tracing::subscriber::set_global_default(subscriber).expect("global subscriber already set");
                tracing::warn!(error = %e, "syslog unavailable, falling back to stdout/file only");
            }
        }
    } else {
        tracing::subscriber::set_global_default(subscriber).expect("global subscriber already set");
    }

    LoggingGuard {
        _file_guard: Some(file_guard),
    }
}

type SyslogLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

/// Adapts a shared `syslog::Logger` to the `tracing_subscriber::fmt`
/// per-event writer interface (one `SyslogWriter` is created per log
/// line; the `Arc<Mutex<_>>` it wraps is what's actually shared).
struct SyslogWriter {
    inner: Arc<Mutex<SyslogLogger>>,
}

impl std::io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        if let Ok(mut logger) = self.inner.lock() {
            let _ = logger.info(text.trim_end());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
