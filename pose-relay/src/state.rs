//! Application state shared across handlers

use std::sync::Arc;

use crate::config::Config;
use crate::relay::Relay;

/// Handed to every axum handler
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
    pub relay: Relay,
}

impl AppState {
    /// Build state and a fresh relay from configuration
    pub fn new(config: Config) -> Self {
        let relay = Relay::from_config(&config);
        Self {
            config: Arc::new(config),
            relay,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
