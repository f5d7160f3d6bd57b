//! Logging setup

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives
pub const LOG_ENV: &str = "TETHER_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Install the global `tracing` subscriber
///
/// Returns `false` when a subscriber was already installed, so repeated
/// calls (from tests, say) are harmless.
pub fn init_logging(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let first = init_logging(LogFormat::Compact);
        assert!(!init_logging(LogFormat::Json));
        tracing::info!(first, "logging initialised");
    }
}
