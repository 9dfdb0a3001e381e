use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_CYCLE_DEADLINE_SECS: u64 = 5 * 60;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Top-level config (capsule.toml + CAPSULE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// When and how the delivery cycle runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cron expression, seconds resolution (`"0 0 8 * * *"`) or five fields.
    #[serde(default)]
    pub cron: String,
    /// IANA zone for both the cron timer and the "due today" window.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Hard upper bound for one delivery cycle.
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,
    /// How long `stop` waits for an in-flight cycle.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron: String::new(),
            timezone: default_timezone(),
            cycle_deadline_secs: DEFAULT_CYCLE_DEADLINE_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Outbound mail server credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Envelope and header sender, e.g. `"Future Letter <noreply@example.com>"`.
    #[serde(default)]
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SMTP_PORT,
            username: String::new(),
            password: String::new(),
            from: String::new(),
        }
    }
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.capsule/capsule.db", home)
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_cycle_deadline_secs() -> u64 {
    DEFAULT_CYCLE_DEADLINE_SECS
}
fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

impl CapsuleConfig {
    /// Load config from a TOML file with CAPSULE_* env var overrides, then
    /// validate it.
    ///
    /// Nested keys use a double underscore: `CAPSULE_SMTP__HOST`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CAPSULE_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: CapsuleConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that would only fail later, on the first send.
    pub fn validate(&self) -> Result<()> {
        let required: [(&'static str, &str); 5] = [
            ("scheduler.cron", self.scheduler.cron.as_str()),
            ("smtp.host", self.smtp.host.as_str()),
            ("smtp.username", self.smtp.username.as_str()),
            ("smtp.password", self.smtp.password.as_str()),
            ("smtp.from", self.smtp.from.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(CoreError::MissingField(*field));
        }
        if self.smtp.port == 0 {
            return Err(CoreError::Config("smtp.port must be non-zero".to_string()));
        }
        if self.scheduler.cycle_deadline_secs == 0 {
            return Err(CoreError::Config(
                "scheduler.cycle_deadline_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.capsule/capsule.toml", home)
}
