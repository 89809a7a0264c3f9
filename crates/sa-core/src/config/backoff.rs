//! Reconnect backoff configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0), added on top of the delay
    pub jitter: f64,

    /// Number of failed attempts before giving up (0 = never give up)
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(2000),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Check the values make sense
    pub fn validate(&self) -> Result<(), String> {
        if self.multiplier < 1.0 {
            return Err(format!("backoff multiplier {} is below 1.0", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("backoff jitter {} is outside 0.0..=1.0", self.jitter));
        }
        if self.initial > self.max {
            return Err("backoff initial delay exceeds max delay".to_string());
        }
        Ok(())
    }
}
