//! Shared argument types.

use clap::ValueEnum;
use tracing::Level;

/// Maximum log level written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse_and_convert() {
        let level = LogLevel::from_str("debug", true).unwrap();
        assert_eq!(level, LogLevel::Debug);
        assert_eq!(Level::from(level), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::default()), Level::INFO);
    }
}
