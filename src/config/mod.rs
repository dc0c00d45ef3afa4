//! Typed configuration.
//!
//! [`Config`] comes from environment variables and says where things are
//! (database, telemetry endpoint, settings file). [`Settings`] comes from a
//! TOML file and says how the engine behaves. Both load once at startup and
//! fail fast. Sensitive values are wrapped in `secrecy::SecretString` to
//! prevent log leaks.

pub mod settings;

pub use settings::{
    AntiTrollSettings, CategoryCurve, CurveSettings, GeoUnitCurve, QuorumSettings,
    SchedulerSettings, Settings,
};

use std::path::PathBuf;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Path to the TOML settings file. Built-in defaults apply when unset.
    pub settings_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            settings_path: std::env::var("TALLY_SETTINGS").ok().map(PathBuf::from),
        })
    }

    /// The database URL, for commands that cannot run without one.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })
    }

    /// Load the engine settings this configuration points at.
    pub fn load_settings(&self) -> Result<Settings> {
        match &self.settings_path {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }
}
