//! Tracing subscriber initialization.

use crate::{ConfigError, LatchkeyResult, TelemetryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Fails with
/// `ConfigError::Telemetry` if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> LatchkeyResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ConfigError::Telemetry {
            reason: format!("invalid log filter {:?}: {}", config.log_filter, e),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.map_err(|e| ConfigError::Telemetry {
        reason: e.to_string(),
    })?;

    tracing::info!(
        log_filter = %config.log_filter,
        json = config.json,
        "Tracing initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let config = TelemetryConfig::default();
        // Whichever call loses the race to install the global subscriber fails.
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        assert!(first.is_err() || second.is_err());
    }
}
