use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Overrides `--log-level` with full filter directives, e.g.
/// `mastercomm_link=debug,warn`.
pub const LOG_ENV: &str = "MASTERCOMM_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Directives from `env` win; unparsable directives fall back to `level`.
fn log_filter(level: LogLevel, env: Option<&str>) -> (EnvFilter, Option<String>) {
    match env.map(str::trim).filter(|dirs| !dirs.is_empty()) {
        Some(dirs) => match EnvFilter::try_new(dirs) {
            Ok(filter) => (filter, None),
            Err(err) => (
                EnvFilter::new(level.directive()),
                Some(format!("ignoring {LOG_ENV}={dirs:?}: {err}")),
            ),
        },
        None => (EnvFilter::new(level.directive()), None),
    }
}

/// Logs go to stderr; stdout carries command output only.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(LOG_ENV).ok();
    let (filter, rejected) = log_filter(level, env.as_deref());
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(false);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Some(message) = rejected {
        tracing::warn!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_flag_sets_filter() {
        let (filter, rejected) = log_filter(LogLevel::Debug, None);
        assert_eq!(filter.to_string(), "debug");
        assert!(rejected.is_none());
    }

    #[test]
    fn blank_env_is_ignored() {
        let (filter, rejected) = log_filter(LogLevel::Warn, Some("  "));
        assert_eq!(filter.to_string(), "warn");
        assert!(rejected.is_none());
    }

    #[test]
    fn env_directives_override_level() {
        let (filter, rejected) = log_filter(LogLevel::Error, Some("mastercomm_link=trace"));
        assert_eq!(filter.to_string(), "mastercomm_link=trace");
        assert!(rejected.is_none());
    }

    #[test]
    fn bad_env_directives_fall_back_to_level() {
        let (filter, rejected) = log_filter(LogLevel::Info, Some("mastercomm_link=loud"));
        assert_eq!(filter.to_string(), "info");
        assert!(rejected.unwrap().contains(LOG_ENV));
    }
}
