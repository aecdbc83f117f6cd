//! Error types for crosswire.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Locator validation errors. These are fatal and raised before any dispatch.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("Locator is missing the '{expected}' prefix")]
    MissingPrefix { expected: String },

    #[error("Locator payload is not valid base64: {0}")]
    InvalidEncoding(String),

    #[error("Locator payload has length {length}, expected {expected}")]
    InvalidLength { length: usize, expected: usize },

    #[error("Locator checksum mismatch")]
    ChecksumMismatch,
}

/// Channel-related errors. One channel's failure is recorded as data in its
/// `ChannelResult` and never aborts a broadcast.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Rate limited on channel {name}: {reason}")]
    RateLimited { name: String, reason: String },

    #[error("Send on channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Subscription failed on channel {name}: {reason}")]
    SubscribeFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

impl ChannelError {
    /// The failure text fed to rate-limit classification.
    pub fn reason(&self) -> String {
        match self {
            Self::SendFailed { reason, .. }
            | Self::RateLimited { reason, .. }
            | Self::Disconnected { reason, .. }
            | Self::SubscribeFailed { reason, .. } => reason.clone(),
            Self::Timeout { timeout, .. } => format!("timed out after {timeout:?}"),
            Self::InvalidMessage(reason) => reason.clone(),
        }
    }
}

/// Persistence errors. Tracking writes log and swallow these; they must never
/// block message delivery.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store write failed: {0}")]
    Write(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    // --- LocatorError ---

    #[test]
    fn test_locator_error_missing_prefix_display() {
        let err = LocatorError::MissingPrefix {
            expected: "cw1".to_string(),
        };
        assert!(err.to_string().contains("cw1"));
    }

    #[test]
    fn test_locator_error_invalid_length_display() {
        let err = LocatorError::InvalidLength {
            length: 12,
            expected: 36,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("36"));
    }

    // --- ChannelError ---

    #[test]
    fn test_channel_error_send_failed_display() {
        let err = ChannelError::SendFailed {
            name: "relay".to_string(),
            reason: "socket closed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("relay"));
        assert!(msg.contains("socket closed"));
    }

    #[test]
    fn test_channel_error_timeout_display() {
        let err = ChannelError::Timeout {
            name: "mesh".to_string(),
            timeout: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("mesh"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_channel_error_reason_extraction() {
        let err = ChannelError::RateLimited {
            name: "relay".to_string(),
            reason: "429 too many requests".to_string(),
        };
        assert_eq!(err.reason(), "429 too many requests");

        let err = ChannelError::Timeout {
            name: "relay".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.reason().contains("timed out"));
    }

    // --- StoreError ---

    #[test]
    fn test_store_error_write_display() {
        let err = StoreError::Write("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }

    // --- From conversions into top-level Error ---

    #[test]
    fn test_error_from_locator_error() {
        let err = Error::from(LocatorError::ChecksumMismatch);
        assert!(err.to_string().contains("Locator error"));
    }

    #[test]
    fn test_error_from_channel_error() {
        let inner = ChannelError::InvalidMessage("truncated".to_string());
        let err = Error::from(inner);
        assert!(err.to_string().contains("Channel error"));
    }

    #[test]
    fn test_error_from_store_error() {
        let err = Error::from(StoreError::Query("bad key".to_string()));
        assert!(err.to_string().contains("Store error"));
    }

    #[test]
    fn test_error_from_config_error() {
        let inner = ConfigError::InvalidValue {
            key: "CROSSWIRE_SEND_TIMEOUT_SECS".to_string(),
            message: "not a number".to_string(),
        };
        let err = Error::from(inner);
        assert!(err.to_string().contains("Configuration error"));
    }
}
