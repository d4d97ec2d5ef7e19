//! Node level settings.
//!
//! Addresses are not part of [`BusConfig`], they live in the node's
//! persistent [`ConfigStore`](crate::router::ConfigStore) and may change at
//! runtime.

use crate::types::Version;

/// Tick counts driving the token ring. One tick is one poll of the driver,
/// nominally 10 ms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Ticks from loop start to the short break, where a registered node
    /// hands the token on.
    pub short_period: u16,
    /// Ticks from loop start to the long break, where the last node of the
    /// ring wraps the token around to the leftmost node.
    pub long_period: u16,
    /// Ticks without a resetting event before the ring state regresses.
    pub max_wait: u16,
    /// Loops without seeing the token before it is considered lost.
    pub token_lost_loops: u16,
}

impl Timing {
    /// Length of one loop in ticks.
    pub const fn loop_period(&self) -> u16 {
        self.short_period + self.long_period
    }

    pub const fn token_lost_after(&self) -> u16 {
        self.token_lost_loops * self.loop_period()
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            short_period: 30,
            long_period: 70,
            max_wait: 1000,
            token_lost_loops: 4,
        }
    }
}

/// Settings of a bus driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// Number of logical sub-devices hosted by this node, each with its own
    /// address.
    pub devices: usize,
    /// Version used for application frames. Token frames use the version
    /// negotiated on the ring.
    pub version: Version,
    pub timing: Timing,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            devices: 1,
            version: Version::LATEST,
            timing: Timing::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = Timing::default();
        assert_eq!(timing.loop_period(), 100);
        assert_eq!(timing.token_lost_after(), 400);
        assert_eq!(timing.max_wait, 1000);
    }
}
