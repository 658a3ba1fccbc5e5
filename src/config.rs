use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Runtime configuration. Layers, lowest first: built-in defaults,
/// `config/default.*`, `config/{RUN_MODE}.*`, `AGENDAD__*` env vars
/// (`AGENDAD__SERVER__PORT=8080`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub auth: AuthSettings,
    pub audit: AuditSettings,
    pub reminders: ReminderSettings,
    pub metrics_port: Option<u16>,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub wal_file: String,
    /// Rewrite the WAL once this many appends accumulated.
    pub compact_threshold: u64,
    pub compact_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Ask the external token-validation service.
    Http,
    /// Tokens listed in `auth.static_tokens`.
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub validation_url: String,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub static_tokens: Vec<StaticTokenSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTokenSettings {
    /// Hex SHA-256 of the bearer token; the token itself is never stored.
    pub token_sha256: String,
    pub token_id: String,
    pub organization_id: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lead_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            auth: AuthSettings::default(),
            audit: AuditSettings::default(),
            reminders: ReminderSettings::default(),
            metrics_port: None,
            log_filter: "info".into(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "agendad.wal".into(),
            compact_threshold: 1000,
            compact_interval_secs: 60,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Http,
            validation_url: "http://localhost:54321/functions/v1/validate-api-token".into(),
            request_timeout_secs: 10,
            cache_ttl_secs: 60,
            static_tokens: Vec::new(),
        }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data/api_request_logs.jsonl"),
        }
    }
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            lead_minutes: 24 * 60,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                Environment::with_prefix("AGENDAD")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.mode == AuthMode::Http && self.auth.validation_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "auth.validation_url is required when auth.mode = http".into(),
            ));
        }
        if self.auth.mode == AuthMode::Static && self.auth.static_tokens.is_empty() {
            return Err(ConfigError::Message(
                "auth.static_tokens is empty while auth.mode = static".into(),
            ));
        }
        if self.storage.wal_file.trim().is_empty() {
            return Err(ConfigError::Message("storage.wal_file is required".into()));
        }
        Ok(())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.wal_file)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
