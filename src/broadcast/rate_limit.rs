//! Rate-limit and connection-failure classification.
//!
//! Classifies a failed send into a cooldown-worthy category or a plain
//! failure. Rules are ordered most specific first: channel-specific throttle
//! phrases, then an explicit retry-after value, then the generic failure
//! buckets. True rate limits and connection failures share the cooldown
//! mechanism downstream but keep distinct categories for observability.

use std::collections::HashMap;
use std::time::Duration;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;

/// Failure category assigned by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Matched a known throttle phrase.
    ChannelThrottle,
    /// Carried an explicit retry-after value.
    RetryAfter,
    /// The endpoint refused the connection.
    ConnectionRefused,
    /// The endpoint rejected our credentials.
    AuthRejected,
    /// The send timed out.
    NetworkTimeout,
    /// Generic network or connection error.
    NetworkError,
}

impl FailureCategory {
    /// Stable identifier used in cooldown reasons and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelThrottle => "channel_throttle",
            Self::RetryAfter => "retry_after",
            Self::ConnectionRefused => "connection_refused",
            Self::AuthRejected => "auth_rejected",
            Self::NetworkTimeout => "network_timeout",
            Self::NetworkError => "network_error",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of classifying one failure text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the failure is a true rate limit (throttle or retry-after).
    pub is_rate_limited: bool,
    /// Assigned category.
    pub category: FailureCategory,
    /// Cooldown to impose on the (channel, endpoint) pair.
    pub cooldown: Duration,
    /// Whether the endpoint itself is unreachable or rejecting us.
    pub is_connection_failure: bool,
}

/// Phrase set paired with the cooldown it imposes.
struct PhraseRule {
    matcher: AhoCorasick,
    cooldown: Duration,
}

impl PhraseRule {
    fn new(phrases: &[&str], cooldown: Duration) -> Self {
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(phrases)
            .expect("static phrase set builds");
        Self { matcher, cooldown }
    }
}

/// Classifies failed sends. Construct once and share.
pub struct RateLimitDetector {
    /// Channel-specific throttle phrases, most specific rule of all.
    channel_rules: HashMap<String, PhraseRule>,
    generic_throttle: PhraseRule,
    retry_after: Regex,
    connection_refused: PhraseRule,
    auth_rejected: PhraseRule,
    timeout: PhraseRule,
    network: PhraseRule,
}

impl RateLimitDetector {
    pub fn new() -> Self {
        Self {
            channel_rules: HashMap::new(),
            generic_throttle: PhraseRule::new(
                &[
                    "rate limit",
                    "rate-limit",
                    "too many requests",
                    "429",
                    "slow mode",
                    "slow down",
                    "flood",
                ],
                Duration::from_secs(45),
            ),
            retry_after: Regex::new(r"(?i)retry[-_ ]?after[:=\s]+(\d+)")
                .expect("static regex compiles"),
            connection_refused: PhraseRule::new(
                &["connection refused", "refused", "no route to host"],
                Duration::from_secs(300),
            ),
            auth_rejected: PhraseRule::new(
                &["unauthorized", "forbidden", "authentication", "auth failed"],
                Duration::from_secs(300),
            ),
            timeout: PhraseRule::new(
                &["timed out", "timeout", "deadline exceeded"],
                Duration::from_secs(120),
            ),
            network: PhraseRule::new(
                &[
                    "network",
                    "connection reset",
                    "connection closed",
                    "unreachable",
                    "broken pipe",
                    "dns",
                ],
                Duration::from_secs(180),
            ),
        }
    }

    /// Register channel-specific throttle phrases with their cooldown.
    /// Matched before every built-in rule for that channel.
    pub fn with_channel_phrases(
        mut self,
        channel: &str,
        phrases: &[&str],
        cooldown: Duration,
    ) -> Self {
        self.channel_rules
            .insert(channel.to_string(), PhraseRule::new(phrases, cooldown));
        self
    }

    /// Classify a failure text. `None` means a plain failure with no cooldown.
    pub fn classify(&self, error: &str, channel: &str) -> Option<Classification> {
        if let Some(rule) = self.channel_rules.get(channel) {
            if rule.matcher.is_match(error) {
                return Some(Classification {
                    is_rate_limited: true,
                    category: FailureCategory::ChannelThrottle,
                    cooldown: rule.cooldown,
                    is_connection_failure: false,
                });
            }
        }

        if let Some(caps) = self.retry_after.captures(error) {
            if let Ok(secs) = caps[1].parse::<u64>() {
                return Some(Classification {
                    is_rate_limited: true,
                    category: FailureCategory::RetryAfter,
                    cooldown: Duration::from_secs(secs),
                    is_connection_failure: false,
                });
            }
        }

        if self.generic_throttle.matcher.is_match(error) {
            return Some(Classification {
                is_rate_limited: true,
                category: FailureCategory::ChannelThrottle,
                cooldown: self.generic_throttle.cooldown,
                is_connection_failure: false,
            });
        }

        if self.connection_refused.matcher.is_match(error) {
            return Some(Classification {
                is_rate_limited: false,
                category: FailureCategory::ConnectionRefused,
                cooldown: self.connection_refused.cooldown,
                is_connection_failure: true,
            });
        }

        if self.auth_rejected.matcher.is_match(error) {
            return Some(Classification {
                is_rate_limited: false,
                category: FailureCategory::AuthRejected,
                cooldown: self.auth_rejected.cooldown,
                is_connection_failure: true,
            });
        }

        if self.timeout.matcher.is_match(error) {
            return Some(Classification {
                is_rate_limited: false,
                category: FailureCategory::NetworkTimeout,
                cooldown: self.timeout.cooldown,
                is_connection_failure: false,
            });
        }

        if self.network.matcher.is_match(error) {
            return Some(Classification {
                is_rate_limited: false,
                category: FailureCategory::NetworkError,
                cooldown: self.network.cooldown,
                is_connection_failure: false,
            });
        }

        None
    }
}

impl Default for RateLimitDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Channel-specific phrases win over everything ──

    #[test]
    fn test_channel_phrase_takes_precedence() {
        let detector = RateLimitDetector::new().with_channel_phrases(
            "relay",
            &["relay busy"],
            Duration::from_secs(60),
        );

        // Text also contains a retry-after value; the channel rule is more
        // specific and must win.
        let c = detector
            .classify("relay busy, retry-after: 10", "relay")
            .unwrap();
        assert_eq!(c.category, FailureCategory::ChannelThrottle);
        assert_eq!(c.cooldown, Duration::from_secs(60));
        assert!(c.is_rate_limited);
    }

    #[test]
    fn test_channel_phrase_only_applies_to_its_channel() {
        let detector = RateLimitDetector::new().with_channel_phrases(
            "relay",
            &["relay busy"],
            Duration::from_secs(60),
        );
        assert!(detector.classify("relay busy", "mesh").is_none());
    }

    // ── Retry-after extraction ──

    #[test]
    fn test_retry_after_value_becomes_cooldown() {
        let detector = RateLimitDetector::new();
        let c = detector
            .classify("HTTP 429: retry-after: 90", "relay")
            .unwrap();
        // The retry-after rule runs before the generic "429" phrase, so the
        // stated value wins over the default throttle cooldown.
        assert_eq!(c.category, FailureCategory::RetryAfter);
        assert_eq!(c.cooldown, Duration::from_secs(90));
        assert!(c.is_rate_limited);
    }

    #[test]
    fn test_retry_after_variants_parse() {
        let detector = RateLimitDetector::new();
        for text in [
            "retry-after: 30",
            "Retry_After=30",
            "retry after 30 seconds",
            "RETRY-AFTER:30",
        ] {
            let c = detector.classify(text, "relay").unwrap();
            assert_eq!(c.cooldown, Duration::from_secs(30), "text: {text}");
        }
    }

    // ── Generic throttle phrases ──

    #[test]
    fn test_bare_429_is_throttle() {
        let detector = RateLimitDetector::new();
        let c = detector.classify("server said 429", "relay").unwrap();
        assert_eq!(c.category, FailureCategory::ChannelThrottle);
        assert_eq!(c.cooldown, Duration::from_secs(45));
    }

    #[test]
    fn test_throttle_phrases_case_insensitive() {
        let detector = RateLimitDetector::new();
        let c = detector.classify("Rate Limit Exceeded", "relay").unwrap();
        assert!(c.is_rate_limited);
    }

    // ── Connection failures ──

    #[test]
    fn test_connection_refused_long_cooldown() {
        let detector = RateLimitDetector::new();
        let c = detector.classify("connection refused", "relay").unwrap();
        assert_eq!(c.category, FailureCategory::ConnectionRefused);
        assert_eq!(c.cooldown, Duration::from_secs(300));
        assert!(c.is_connection_failure);
        assert!(!c.is_rate_limited);
    }

    #[test]
    fn test_auth_rejected_flagged_as_connection_failure() {
        let detector = RateLimitDetector::new();
        let c = detector.classify("401 Unauthorized", "relay").unwrap();
        assert_eq!(c.category, FailureCategory::AuthRejected);
        assert!(c.is_connection_failure);
    }

    // ── Timeout and network buckets ──

    #[test]
    fn test_timeout_medium_cooldown() {
        let detector = RateLimitDetector::new();
        let c = detector
            .classify("send timed out after 30s", "relay")
            .unwrap();
        assert_eq!(c.category, FailureCategory::NetworkTimeout);
        assert_eq!(c.cooldown, Duration::from_secs(120));
        assert!(!c.is_connection_failure);
    }

    #[test]
    fn test_generic_network_error() {
        let detector = RateLimitDetector::new();
        let c = detector.classify("connection reset by peer", "relay").unwrap();
        assert_eq!(c.category, FailureCategory::NetworkError);
        assert_eq!(c.cooldown, Duration::from_secs(180));
    }

    // ── Unmatched text is a plain failure ──

    #[test]
    fn test_unmatched_is_plain_failure() {
        let detector = RateLimitDetector::new();
        assert!(detector.classify("recipient mailbox full", "relay").is_none());
        assert!(detector.classify("", "relay").is_none());
    }

    // ── Category identifiers ──

    #[test]
    fn test_category_identifiers_are_stable() {
        assert_eq!(FailureCategory::NetworkTimeout.as_str(), "network_timeout");
        assert_eq!(FailureCategory::RetryAfter.to_string(), "retry_after");
    }
}
