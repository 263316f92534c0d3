//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// Build the log filter: `RUST_LOG` wins, then the configured level.
///
/// Verbose mode raises this crate to `debug` on top of whatever was chosen.
fn build_filter(config: &Config) -> EnvFilter {
    let base = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.service.log_level.clone());

    let filter = EnvFilter::try_new(&base).unwrap_or_else(|_| EnvFilter::new("info"));
    if !config.service.verbose {
        return filter;
    }
    match "pose_relay=debug".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = build_filter(config);

    let installed = if config.service.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    installed.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        verbose = config.service.verbose,
        "Tracing initialized"
    );

    Ok(())
}
