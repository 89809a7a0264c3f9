//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default outbound rate when none was negotiated, in kbit/s
pub const DEFAULT_SEND_SPEED_KBPS: u64 = 200;

/// Outbound send rate of a data pump, in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRate(pub u64);

impl SendRate {
    /// Rate from a kbit/s figure (1 kbit = 1024 bit)
    pub fn from_kbps(kbps: u64) -> Self {
        Self(kbps * 1024)
    }

    /// Bits per second
    pub fn bps(&self) -> u64 {
        self.0
    }

    /// Pause between two packets of `packet_size` bytes at this rate
    ///
    /// Computed as `1000 / (bps / 8 / packet_size)` milliseconds in integer
    /// math. Rates below one packet per second are clamped to one packet per
    /// second.
    pub fn send_interval(&self, packet_size: usize) -> Duration {
        let packet_size = packet_size.max(1) as u64;
        let packets_per_sec = (self.0 / 8 / packet_size).max(1);
        Duration::from_millis(1000 / packets_per_sec)
    }
}

impl Default for SendRate {
    fn default() -> Self {
        Self::from_kbps(DEFAULT_SEND_SPEED_KBPS)
    }
}

impl fmt::Display for SendRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Which local resource a session bridges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Interactive shell on a PTY
    Shell,
    /// Raw TCP port forwarding
    Port,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Shell => write!(f, "shell"),
            SessionKind::Port => write!(f, "port"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let rate = SendRate::default();
        assert_eq!(rate.bps(), 204_800);
        assert_eq!(rate.send_interval(1024), Duration::from_millis(40));
        assert_eq!(rate.send_interval(2048), Duration::from_millis(83));
    }

    #[test]
    fn test_negotiated_interval() {
        // 10000 bps / 8 / 1024 = 1 packet per second
        assert_eq!(
            SendRate(10_000).send_interval(1024),
            Duration::from_millis(1000)
        );
        assert_eq!(
            SendRate(8 * 1024 * 100).send_interval(1024),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_slow_rate_is_clamped() {
        assert_eq!(
            SendRate(10_000).send_interval(2048),
            Duration::from_millis(1000)
        );
        assert_eq!(SendRate(0).send_interval(1024), Duration::from_millis(1000));
    }

    #[test]
    fn test_session_kind_display() {
        assert_eq!(SessionKind::Shell.to_string(), "shell");
        assert_eq!(SessionKind::Port.to_string(), "port");
    }
}
