//! Engine configuration.
//!
//! Settings are loaded with the `config` crate from an optional TOML file
//! plus `SMARTGCAL_*` environment overrides, then validated. Durations are
//! written in human form (`30s`, `12h`) via `humantime_serde`.
//!
//! ```toml
//! [cache]
//! path = "/var/lib/smartgcal/cache"
//! instruments = "/etc/smartgcal/instruments"
//!
//! [remote]
//! host = "gsodb.example.edu"
//! port = 8443
//! request_timeout = "30s"
//!
//! [update]
//! interval = "12h"
//! ```

use crate::error::{GcalError, GcalResult};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where cached files and instrument descriptions live.
#[derive(Clone, Debug, Deserialize)]
pub struct CacheSettings {
    /// Directory the file cache writes to.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Directory of per-instrument TOML descriptions.
    #[serde(default = "default_instruments_path")]
    pub instruments: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            instruments: default_instruments_path(),
        }
    }
}

/// The calibration service endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_context")]
    pub context: String,
    /// Bound on every request so an unreachable service cannot stall a
    /// reconciliation cycle.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl RemoteSettings {
    /// The service root, e.g. `http://gsodb.example.edu:8443/gcal`.
    pub fn service_url(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.context
        )
    }
}

/// Background update behavior.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateSettings {
    /// Time between reconciliation cycles.
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

/// Top-level engine settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
    #[serde(default)]
    pub update: UpdateSettings,
}

impl Settings {
    /// Loads settings from `config/smartgcal.toml` (if present) and the
    /// environment.
    pub fn new() -> GcalResult<Self> {
        Self::load(None)
    }

    /// Loads settings from an explicit file plus the environment.
    pub fn load(path: Option<&Path>) -> GcalResult<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("config/smartgcal").required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("SMARTGCAL").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> GcalResult<()> {
        if self.remote.scheme != "http" && self.remote.scheme != "https" {
            return Err(GcalError::Configuration(format!(
                "unsupported scheme '{}'",
                self.remote.scheme
            )));
        }
        if self.remote.host.is_empty() {
            return Err(GcalError::Configuration(
                "remote host must not be empty".to_string(),
            ));
        }
        if self.remote.request_timeout.is_zero() {
            return Err(GcalError::Configuration(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.update.interval.is_zero() {
            return Err(GcalError::Configuration(
                "update interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("cache")
}

fn default_instruments_path() -> PathBuf {
    PathBuf::from("instruments")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_context() -> String {
    "gcal".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_interval() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}
