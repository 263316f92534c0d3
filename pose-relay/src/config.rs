//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `POSE_RELAY_`, nesting separator `__`,
//!    e.g. `POSE_RELAY_RELAY__HEARTBEAT_INTERVAL_SECS=10`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/pose-relay/config.toml
//! 4. System directory: /etc/pose-relay/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::relay::DeviceClass;

const ENV_PREFIX: &str = "POSE_RELAY_";
const APP_DIR: &str = "pose-relay";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,

    /// Middleware configuration for the HTTP side channel
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_name")]
    pub name: String,

    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Service port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Development flavour: per-envelope debug diagnostics
    #[serde(default)]
    pub verbose: bool,

    /// Seconds to wait for connection tasks after shutdown is signalled
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket mount path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Liveness monitor period in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// `pose_data` admissions per rate window
    #[serde(default = "default_rate_limit_per_window")]
    pub rate_limit_per_window: u32,

    /// Rate window length in milliseconds
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,

    /// How often idle rate counters are swept, in seconds
    #[serde(default = "default_rate_sweep_interval_secs")]
    pub rate_sweep_interval_secs: u64,

    /// Counters idle for this many windows are swept
    #[serde(default = "default_rate_idle_multiplier")]
    pub rate_idle_multiplier: u32,

    /// Per-connection outbound queue depth
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Largest inbound WebSocket message accepted, in bytes
    #[serde(default = "default_max_message_size_bytes")]
    pub max_message_size_bytes: usize,

    /// Length of server-minted room codes
    #[serde(default = "default_room_code_length")]
    pub room_code_length: usize,

    /// Device class that produces frames
    #[serde(default = "default_capture_class")]
    pub capture_class: String,

    /// Device class that renders frames
    #[serde(default = "default_display_class")]
    pub display_class: String,
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms.max(1))
    }

    pub fn rate_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_sweep_interval_secs.max(1))
    }

    /// Idle time after which a rate counter is discarded
    pub fn rate_idle_after(&self) -> Duration {
        self.rate_window() * self.rate_idle_multiplier.max(1)
    }

    pub fn capture(&self) -> DeviceClass {
        DeviceClass::parse(&self.capture_class)
    }

    pub fn display(&self) -> DeviceClass {
        DeviceClass::parse(&self.display_class)
    }
}

/// Middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// CORS mode: "permissive", "restrictive", or "disabled"
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,

    /// Timeout for side-channel HTTP requests, in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Convert handler panics into 500 responses
    #[serde(default = "default_true")]
    pub catch_panic: bool,
}

impl MiddlewareConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Default value functions
fn default_name() -> String {
    APP_DIR.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_rate_limit_per_window() -> u32 {
    30
}

fn default_rate_window_ms() -> u64 {
    1000
}

fn default_rate_sweep_interval_secs() -> u64 {
    60
}

fn default_rate_idle_multiplier() -> u32 {
    10
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_message_size_bytes() -> usize {
    1024 * 1024
}

fn default_room_code_length() -> usize {
    6
}

fn default_capture_class() -> String {
    "mobile".to_string()
}

fn default_display_class() -> String {
    "vr".to_string()
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            environment: default_environment(),
            verbose: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            rate_limit_per_window: default_rate_limit_per_window(),
            rate_window_ms: default_rate_window_ms(),
            rate_sweep_interval_secs: default_rate_sweep_interval_secs(),
            rate_idle_multiplier: default_rate_idle_multiplier(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_size_bytes: default_max_message_size_bytes(),
            room_code_length: default_room_code_length(),
            capture_class: default_capture_class(),
            display_class: default_display_class(),
        }
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            cors_mode: default_cors_mode(),
            request_timeout_secs: default_timeout(),
            catch_panic: true,
        }
    }
}

impl Config {
    /// Load configuration from the standard search paths
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so later files override earlier ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses the search paths; environment variables still override.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Candidate config files, highest priority first
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_DIR);
        if let Ok(path) = xdg_dirs.place_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc").join(APP_DIR).join("config.toml"));

        paths
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}
