//! Environment-driven configuration.
//!
//! All knobs have working defaults; deployments override them through
//! `CROSSWIRE_*` environment variables (a `.env` file is honored via
//! `dotenvy`).

use std::collections::HashSet;
use std::time::Duration;

/// Runtime configuration for the broadcaster and cooldown registry.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on any single (channel, endpoint) send.
    pub send_timeout: Duration,
    /// Interval between batched cooldown reminder scans.
    pub reminder_interval: Duration,
    /// Channel names excluded from the enabled set regardless of support.
    pub disabled_channels: HashSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            reminder_interval: Duration::from_secs(300),
            disabled_channels: HashSet::new(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults for
    /// anything unset or unparseable (the bad value is logged and ignored).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(secs) = parse_secs("CROSSWIRE_SEND_TIMEOUT_SECS") {
            config.send_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_secs("CROSSWIRE_REMINDER_INTERVAL_SECS") {
            config.reminder_interval = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("CROSSWIRE_DISABLED_CHANNELS") {
            config.disabled_channels = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    /// Whether a channel is administratively disabled.
    pub fn is_disabled(&self, channel: &str) -> bool {
        self.disabled_channels.contains(channel)
    }
}

fn parse_secs(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable duration variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert_eq!(config.reminder_interval, Duration::from_secs(300));
        assert!(config.disabled_channels.is_empty());
    }

    #[test]
    fn test_is_disabled() {
        let mut config = Config::default();
        config.disabled_channels.insert("relay".to_string());
        assert!(config.is_disabled("relay"));
        assert!(!config.is_disabled("mesh"));
    }

    #[test]
    fn test_disabled_channel_list_parsing() {
        let raw = "relay, mesh,,  dropbox ";
        let parsed: HashSet<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert!(parsed.contains("relay"));
        assert!(parsed.contains("mesh"));
        assert!(parsed.contains("dropbox"));
    }
}
