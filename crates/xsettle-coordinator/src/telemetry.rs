//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use xsettle_types::{Result, SettlementError, TelemetryConfig, constants};

/// Install the global subscriber. `RUST_LOG` wins over
/// `config.log_level`. Fails if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| SettlementError::Configuration(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.map_err(|e| SettlementError::Configuration(format!("tracing init failed: {e}")))?;

    tracing::info!(
        service = constants::SERVICE_NAME,
        version = constants::VERSION,
        json = config.json_logs,
        "Tracing initialized"
    );
    Ok(())
}
