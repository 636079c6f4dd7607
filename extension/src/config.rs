use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BridgeConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Message sent to the background when a subscription is detached.
    /// Unset: detaching is purely local.
    #[serde(default)]
    pub unsubscribe_message: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfirmationConfig {
    /// How long a confirmation screen shows its terminal status
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl ConfirmationConfig {
    pub fn settle_for(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_settle_ms() -> u64 {
    1500
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    #[serde(default = "default_home_route")]
    pub home_route: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            home_route: default_home_route(),
        }
    }
}

fn default_home_route() -> String {
    "/".to_string()
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Like `load`, but a missing file means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(message) = &self.client.unsubscribe_message {
            if message.trim().is_empty() {
                anyhow::bail!("[client] unsubscribe_message must not be empty");
            }
        }
        if !self.router.home_route.starts_with('/') {
            anyhow::bail!(
                "Invalid home_route: {}. Must start with '/'",
                self.router.home_route
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BridgeConfig::parse("").unwrap();

        assert_eq!(config.client.unsubscribe_message, None);
        assert_eq!(config.confirmation.settle_ms, 1500);
        assert_eq!(config.router.home_route, "/");
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::parse(
            r#"
            [client]
            unsubscribe_message = "unsubscribe"

            [confirmation]
            settle_ms = 250

            [router]
            home_route = "/home"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.unsubscribe_message.as_deref(), Some("unsubscribe"));
        assert_eq!(config.confirmation.settle_for(), Duration::from_millis(250));
        assert_eq!(config.router.home_route, "/home");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = BridgeConfig::parse("[router]\nhome_route = \"home\"").unwrap();
        assert!(config.validate().is_err());

        let config = BridgeConfig::parse("[client]\nunsubscribe_message = \" \"").unwrap();
        assert!(config.validate().is_err());
    }
}
