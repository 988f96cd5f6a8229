//! Configuration for the funnel daemon.
//!
//! Loaded from `~/.leadfunnel/config.toml` (or an explicit path). Every
//! section has defaults so an empty file is a valid configuration. Secrets
//! are never stored in the file; it only names the environment variable
//! that holds them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default listen address for the HTTP API.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4300";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Root directory for config and the default database.
///
/// `LEADFUNNEL_HOME` wins over `~/.leadfunnel`.
pub fn leadfunnel_home() -> PathBuf {
    if let Ok(home) = std::env::var("LEADFUNNEL_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".leadfunnel")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Address the HTTP API binds to.
    pub listen_addr: String,
    pub store: StoreConfig,
    pub verification: VerificationConfig,
    pub funnel: FunnelSettings,
    pub country: CountryHeaderConfig,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            store: StoreConfig::default(),
            verification: VerificationConfig::default(),
            funnel: FunnelSettings::default(),
            country: CountryHeaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite://<path>`, a bare file path, or `:memory:`.
    pub database_url: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite://{}", leadfunnel_home().join("leads.db").display()),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Provider name: `twilio` (default) or `console`.
    pub provider: String,
    /// Number of digits in a one-time code.
    pub code_length: usize,
    /// Minimum gap between two code sends for the same lead.
    pub resend_cooldown_secs: u64,
    /// Enforce the resend cooldown in the orchestrator as well as the widget.
    pub server_resend_cooldown: bool,
    /// Failed checks allowed per sent code before the lead is locked out.
    pub max_verify_attempts: u32,
    /// Seconds after the last failed check before a lead's counter is dropped.
    pub lockout_window_secs: u64,
    /// Calling code applied to numbers typed without `+`/`00` (e.g. `"1"`).
    pub default_calling_code: Option<String>,
    /// Timeout applied by the provider HTTP client.
    pub request_timeout_secs: u64,
    pub twilio: TwilioConfig,
    pub console: ConsoleVerifierConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            provider: "twilio".to_string(),
            code_length: 6,
            resend_cooldown_secs: 30,
            server_resend_cooldown: true,
            max_verify_attempts: 5,
            lockout_window_secs: 3600,
            default_calling_code: None,
            request_timeout_secs: 10,
            twilio: TwilioConfig::default(),
            console: ConsoleVerifierConfig::default(),
        }
    }
}

/// Twilio Verify credentials. The auth token is read from `auth_token_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub service_sid: String,
    pub auth_token_env: String,
    pub base_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            service_sid: String::new(),
            auth_token_env: "TWILIO_AUTH_TOKEN".to_string(),
            base_url: "https://verify.twilio.com".to_string(),
        }
    }
}

/// Local development provider that logs codes instead of sending them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleVerifierConfig {
    pub code_ttl_secs: u64,
}

impl Default for ConsoleVerifierConfig {
    fn default() -> Self {
        Self { code_ttl_secs: 600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelSettings {
    /// Free-text details are truncated to this many characters.
    pub details_max_len: usize,
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self {
            details_max_len: 1000,
        }
    }
}

/// Trusted edge headers carrying the visitor's country.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountryHeaderConfig {
    pub primary_header: String,
    pub secondary_header: String,
}

impl Default for CountryHeaderConfig {
    fn default() -> Self {
        Self {
            primary_header: "x-vercel-ip-country".to_string(),
            secondary_header: "cf-ipcountry".to_string(),
        }
    }
}

impl FunnelConfig {
    /// Load from `path`, or from `~/.leadfunnel/config.toml` when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (leadfunnel_home().join("config.toml"), false),
        };

        let mut config = if path.exists() || required {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LEADFUNNEL_DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Ok(provider) = std::env::var("LEADFUNNEL_VERIFY_PROVIDER") {
            self.verification.provider = provider;
        }
        if let Ok(addr) = std::env::var("LEADFUNNEL_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
    }

    /// Reject values that would make the funnel unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=10).contains(&self.verification.code_length) {
            return Err(ConfigError::Invalid(format!(
                "verification.code_length must be between 4 and 10, got {}",
                self.verification.code_length
            )));
        }
        if self.verification.max_verify_attempts == 0 {
            return Err(ConfigError::Invalid(
                "verification.max_verify_attempts must be at least 1".to_string(),
            ));
        }
        if self.funnel.details_max_len == 0 {
            return Err(ConfigError::Invalid(
                "funnel.details_max_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
