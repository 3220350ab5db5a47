use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MailwatchError, Result};

/// Credentials and endpoint for one IMAP account.
///
/// Immutable after construction; each [`MailboxWatcher`](crate::imap::MailboxWatcher)
/// owns exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Email address, also used as the IMAP login name.
    pub email: String,

    /// Account password.
    pub password: String,

    /// IMAP server hostname.
    pub host: String,

    /// IMAP server port (default: 993 for implicit TLS).
    #[serde(default = "default_imap_port")]
    pub port: u16,
}

impl AccountConfig {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            host: host.into(),
            port,
        }
    }
}

/// Top-level configuration: a map of account name to account credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

impl WatchConfig {
    /// Load configuration from a specific TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading configuration");

        let content = fs::read_to_string(path)
            .map_err(|e| MailwatchError::Config(format!("failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: WatchConfig = toml::from_str(content)
            .map_err(|e| MailwatchError::Config(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from the first default path that exists, or an
    /// empty configuration when none does.
    pub fn load() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                return Self::from_path(&path);
            }
        }

        info!("no config file found, using empty config");
        Ok(Self::default())
    }
}

/// Default config file locations, in lookup order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailwatch").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("mailwatch")
                .join("config.toml"),
        );
    }

    paths
}

fn default_imap_port() -> u16 {
    993
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_account_with_explicit_port() {
        let config = WatchConfig::from_toml(
            r#"
            [accounts.work]
            email = "user@example.com"
            password = "hunter2"
            host = "imap.example.com"
            port = 143
            "#,
        )
        .unwrap();

        let account = &config.accounts["work"];
        assert_eq!(account.email, "user@example.com");
        assert_eq!(account.host, "imap.example.com");
        assert_eq!(account.port, 143);
    }

    #[test]
    fn port_defaults_to_993() {
        let config = WatchConfig::from_toml(
            r#"
            [accounts.personal]
            email = "me@example.com"
            password = "secret"
            host = "mail.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.accounts["personal"].port, 993);
    }

    #[test]
    fn empty_config_has_no_accounts() {
        let config = WatchConfig::from_toml("").unwrap();
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = WatchConfig::from_toml("accounts = 42").unwrap_err();
        assert!(matches!(err, MailwatchError::Config(_)));
    }
}
