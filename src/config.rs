use crate::command::PasswordMode;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store_path: PathBuf,
    pub fetchers: FetchersConfig,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub quiet: bool,
}

#[derive(Deserialize, Clone)]
pub struct FetchersConfig {
    pub allow_fetchers: bool,
    pub mpop_binary: PathBuf,
    pub data_folder: PathBuf,
    pub delivery_script: PathBuf,
    pub default_interval_minutes: i64,
    pub process_timeout_seconds: u64,
    pub max_concurrent_fetchers: usize,
    #[serde(default)]
    pub password_mode: PasswordMode,
    #[serde(default)]
    pub tool_debug: bool,
    pub secret: String,
}

pub const DEFAULT_MPOP_BINARY: &str = "/usr/bin/mpop";
pub const DEFAULT_DATA_FOLDER: &str = "/opt/afterlogic/data";
pub const DEFAULT_DELIVERY_SCRIPT: &str = "/usr/lib/dovecot/dovecot-lda";
pub const DEFAULT_STORE_PATH: &str = "fetchers.json";

// Should match the interval of the cron job driving the runner
pub const DEFAULT_INTERVAL_MINUTES: i64 = 20;

// Upper bound for a single mpop run (10 minutes)
pub const DEFAULT_PROCESS_TIMEOUT_SECONDS: u64 = 600;

pub const DEFAULT_MAX_CONCURRENT_FETCHERS: i64 = 4;

impl AppConfig {
    // Load config from defaults, then file (if exists), then environment variables
    pub fn new() -> Result<Self, ConfigError> {
        Self::configure_defaults()?
            .add_source(File::with_name("config").required(false))
            // e.g. APP_FETCHERS__ALLOW_FETCHERS=true APP_STORE_PATH=...
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    // Load config from a specific file path
    pub fn new_from_file(path: &str) -> Result<Self, ConfigError> {
        Self::configure_defaults()?
            .add_source(File::with_name(path).required(true))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn configure_defaults()
    -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("store_path", DEFAULT_STORE_PATH)?
            .set_default("fetchers.allow_fetchers", false)?
            .set_default("fetchers.mpop_binary", DEFAULT_MPOP_BINARY)?
            .set_default("fetchers.data_folder", DEFAULT_DATA_FOLDER)?
            .set_default("fetchers.delivery_script", DEFAULT_DELIVERY_SCRIPT)?
            .set_default("fetchers.default_interval_minutes", DEFAULT_INTERVAL_MINUTES)?
            .set_default(
                "fetchers.process_timeout_seconds",
                DEFAULT_PROCESS_TIMEOUT_SECONDS as i64,
            )?
            .set_default(
                "fetchers.max_concurrent_fetchers",
                DEFAULT_MAX_CONCURRENT_FETCHERS,
            )?
            .set_default("fetchers.secret", "")
    }
}

// The encryption secret never shows up in logs.
impl fmt::Debug for FetchersConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchersConfig")
            .field("allow_fetchers", &self.allow_fetchers)
            .field("mpop_binary", &self.mpop_binary)
            .field("data_folder", &self.data_folder)
            .field("delivery_script", &self.delivery_script)
            .field("default_interval_minutes", &self.default_interval_minutes)
            .field("process_timeout_seconds", &self.process_timeout_seconds)
            .field("max_concurrent_fetchers", &self.max_concurrent_fetchers)
            .field("password_mode", &self.password_mode)
            .field("tool_debug", &self.tool_debug)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FetchersConfig {
    /// Checks the external tools a pass depends on.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.mpop_binary.is_file() {
            anyhow::bail!("mpop binary {} does not exist", self.mpop_binary.display());
        }
        if !self.delivery_script.is_file() {
            anyhow::bail!(
                "delivery script {} does not exist",
                self.delivery_script.display()
            );
        }
        if self.process_timeout_seconds == 0 {
            anyhow::bail!("process_timeout_seconds must be greater than zero");
        }
        Ok(())
    }
}
