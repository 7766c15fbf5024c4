use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Handshake and anti-abuse policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Maximum age of a challenge before its response is rejected (seconds).
    #[serde(default = "default_max_challenge_age_secs")]
    pub max_challenge_age_secs: u64,
    /// Extra time allowed on top of the challenge age for network latency (seconds).
    #[serde(default = "default_latency_slack_secs")]
    pub latency_slack_secs: u64,
    /// Failed handshakes tolerated from one remote address within the window.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Window over which failures are counted (seconds).
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// How long an address is refused once it exceeds the failure budget (seconds).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_max_challenge_age_secs() -> u64 {
    30
}
fn default_latency_slack_secs() -> u64 {
    5
}
fn default_max_failures() -> u32 {
    5
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_cooldown_secs() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_challenge_age_secs: default_max_challenge_age_secs(),
            latency_slack_secs: default_latency_slack_secs(),
            max_failures: default_max_failures(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl AuthConfig {
    pub fn max_challenge_age(&self) -> Duration {
        Duration::from_secs(self.max_challenge_age_secs)
    }

    /// Upper bound on any single wait for a handshake frame.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.max_challenge_age_secs + self.latency_slack_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.max_challenge_age(), Duration::from_secs(30));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(35));
        assert_eq!(config.max_failures, 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AuthConfig = serde_json::from_str(r#"{"max_challenge_age_secs": 10}"#).unwrap();
        assert_eq!(config.max_challenge_age_secs, 10);
        assert_eq!(config.latency_slack_secs, 5);
        assert_eq!(config.cooldown_secs, 300);
    }
}
