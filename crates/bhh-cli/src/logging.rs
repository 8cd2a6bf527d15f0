use bhh_core::LogLevel;
use bhh_lifecycle::LogLevelSink;
use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Reload handle for the global filter; `None` when another subscriber was
/// already installed.
#[derive(Clone)]
pub struct LogHandle {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

pub fn init_logging() -> LogHandle {
    let filter = match env::var("BHH_LOG_LEVEL") {
        Ok(level) => EnvFilter::new(level),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging_init_skipped: subscriber already set");
        return LogHandle { handle: None };
    }
    LogHandle {
        handle: Some(handle),
    }
}

impl LogLevelSink for LogHandle {
    fn apply_log_level(&self, level: LogLevel) {
        let Some(handle) = &self.handle else {
            return;
        };
        if let Err(err) = handle.reload(EnvFilter::new(level.as_str())) {
            eprintln!("log_level_reload_failed: {err}");
        }
    }
}
