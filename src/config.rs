//! Monitor configuration
//!
//! The configuration is a YAML document listing the IMAP accounts to
//! watch, the SMTP settings used to deliver the consolidated warning,
//! and the alerting policy. A handful of policy values can be
//! overridden from the environment (a `.env` file is honored).

use crate::error::{Error, Result};
use crate::monitor::MonitorSettings;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding `check_interval_days`.
pub const ENV_INTERVAL_DAYS: &str = "CHECK_INTERVAL_DAYS";
/// Environment variable overriding `quota_warning_threshold_percent`.
pub const ENV_THRESHOLD_PERCENT: &str = "QUOTA_WARNING_THRESHOLD_PERCENT";
/// Environment variable overriding `state_file`.
pub const ENV_STATE_FILE: &str = "QUOTA_STATE_FILE";

/// How the IMAP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// TLS from the first byte (IMAPS, usually port 993).
    #[default]
    Tls,
    /// Plain connection upgraded with the STARTTLS command.
    StartTls,
}

impl Security {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IMAP connection settings for a single mailbox.
#[derive(Clone, Deserialize)]
pub struct ImapConfig {
    #[serde(rename = "imap_server", alias = "host")]
    pub host: String,
    #[serde(
        rename = "imap_port",
        alias = "port",
        default = "default_imap_port"
    )]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub security: Security,
    /// Skip certificate verification (self-signed servers, bridges).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// A monitored account: a unique display name plus its connection.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(flatten)]
    pub imap: ImapConfig,
}

/// SMTP settings for the outbound warning.
#[derive(Clone, Deserialize)]
pub struct MailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
    pub recipients: Vec<String>,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| "<redacted>"),
            )
            .field("from_address", &self.from_address)
            .field("recipients", &self.recipients)
            .finish()
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub accounts: Vec<Account>,
    /// Only required when a warning is actually delivered.
    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default = "default_interval_days")]
    pub check_interval_days: u32,
    #[serde(default = "default_threshold_percent")]
    pub quota_warning_threshold_percent: u8,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

const fn default_imap_port() -> u16 {
    993
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_interval_days() -> u32 {
    7
}

const fn default_threshold_percent() -> u8 {
    80
}

fn default_state_file() -> PathBuf {
    PathBuf::from("quota_state.json")
}

const fn default_probe_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrency() -> usize {
    4
}

impl Config {
    /// Load the configuration file, apply environment overrides and
    /// validate the result.
    ///
    /// Reads from `.env` file if present. Recognized overrides:
    /// - `CHECK_INTERVAL_DAYS`
    /// - `QUOTA_WARNING_THRESHOLD_PERCENT`
    /// - `QUOTA_STATE_FILE`
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid YAML for
    /// this schema, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read config file {}: {e}",
                path.display()
            ))
        })?;
        debug!("Loaded config file {}", path.display());

        let mut config = Self::from_yaml(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the schema.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid config: {e}")))
    }

    /// Apply overrides looked up by variable name. Unparseable values
    /// are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_INTERVAL_DAYS) {
            match value.trim().parse() {
                Ok(days) => self.check_interval_days = days,
                Err(_) => warn!(
                    "Invalid value for {ENV_INTERVAL_DAYS}: {value}, \
                     using config/default"
                ),
            }
        }
        if let Some(value) = lookup(ENV_THRESHOLD_PERCENT) {
            match value.trim().parse() {
                Ok(percent) => self.quota_warning_threshold_percent = percent,
                Err(_) => warn!(
                    "Invalid value for {ENV_THRESHOLD_PERCENT}: {value}, \
                     using config/default"
                ),
            }
        }
        if let Some(value) = lookup(ENV_STATE_FILE) {
            if value.trim().is_empty() {
                warn!("Empty value for {ENV_STATE_FILE}, using config/default");
            } else {
                self.state_file = PathBuf::from(value);
            }
        }
    }

    /// Check the invariants the monitor relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            return Err(Error::Config("No accounts configured".into()));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(Error::Config(
                    "Account name must not be empty".into(),
                ));
            }
            if !seen.insert(account.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate account name: {}",
                    account.name
                )));
            }
            if account.imap.port == 0 {
                return Err(Error::Config(format!(
                    "Invalid IMAP port for account {}",
                    account.name
                )));
            }
        }

        if self.quota_warning_threshold_percent > 100 {
            return Err(Error::Config(format!(
                "Threshold must be between 0 and 100, got {}",
                self.quota_warning_threshold_percent
            )));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::Config(
                "probe_timeout_secs must be at least 1".into(),
            ));
        }

        if let Some(mail) = &self.mail
            && mail.recipients.is_empty()
        {
            return Err(Error::Config(
                "mail.recipients must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Per-phase timeout applied to every IMAP probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// The alerting policy handed to [`crate::QuotaMonitor`].
    #[must_use]
    pub const fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            threshold_percent: self.quota_warning_threshold_percent,
            interval_days: self.check_interval_days,
            max_concurrency: self.max_concurrency,
        }
    }
}
