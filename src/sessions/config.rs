//! Configuration for lockstep sessions.
//!
//! | Preset | Latency window | Use |
//! |--------|----------------|-----|
//! | [`SessionConfig::default`] | 5 ticks | internet play at 30 Hz |
//! | [`SessionConfig::lan`] | 2 ticks | same network |
//! | [`SessionConfig::high_latency`] | 12 ticks | intercontinental links |
//!
//! ```
//! use lockstep_chess::{SessionBuilder, SessionConfig};
//! use std::net::SocketAddr;
//!
//! let builder = SessionBuilder::<SocketAddr>::new().with_session_config(SessionConfig::lan());
//! ```

use web_time::Duration;

use crate::error::ChessError;
use crate::network::messages::MAX_PACKET_SIZE;

/// Packet header, body tag, sender ID and list length of a window packet, rounded up.
const WINDOW_OVERHEAD: usize = 64;
/// Tick number and list length of one `(tick, actions)` entry.
const TICK_OVERHEAD: usize = 12;
/// Smallest per-tick budget a valid configuration leaves: a move plus a short chat line.
const MIN_TICK_PAYLOAD: usize = 256;

/// Timing knobs for the lockstep loop. Every peer in a match must use the same
/// `latency_window`; the rest are local.
///
/// New fields may be added; construct with `..SessionConfig::default()`.
///
/// ```
/// use lockstep_chess::SessionConfig;
/// use web_time::Duration;
///
/// let config = SessionConfig {
///     comm_warning_initial: Duration::from_secs(3),
///     ..SessionConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "SessionConfig has no effect unless passed to SessionBuilder::with_session_config()"]
pub struct SessionConfig {
    /// Ticks between queueing a local action and executing it. Also half the width of the
    /// outbound window.
    ///
    /// Default: 5
    pub latency_window: u32,

    /// Empty ticks a replay steps through one at a time before skipping to the next
    /// tick with actions.
    ///
    /// Default: 30
    pub replay_max_wait: u32,

    /// Silence before the first no-communication warning.
    ///
    /// Default: 10s
    pub comm_warning_initial: Duration,

    /// Further silence between repeated warnings.
    ///
    /// Default: 5s
    pub comm_warning_step: Duration,

    /// Once traffic has been heard within this long, the warning threshold drops back to
    /// `comm_warning_initial`.
    ///
    /// Default: 5s
    pub comm_reset_threshold: Duration,

    /// How often the host should call `advance_tick`.
    ///
    /// Default: 30 per second
    pub tick_rate: u32,

    /// How often a joining session repeats its hello.
    ///
    /// Default: 500ms
    pub hello_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            latency_window: 5,
            replay_max_wait: 30,
            comm_warning_initial: Duration::from_secs(10),
            comm_warning_step: Duration::from_secs(5),
            comm_reset_threshold: Duration::from_secs(5),
            tick_rate: 30,
            hello_interval: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    /// Upper bound on `latency_window`. The outbound window spans twice this many ticks and
    /// must still fit in one datagram.
    pub const MAX_LATENCY_WINDOW: u32 = 12;

    /// Creates a new `SessionConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short delay for peers on the same network.
    pub fn lan() -> Self {
        Self {
            latency_window: 2,
            comm_warning_initial: Duration::from_secs(3),
            comm_warning_step: Duration::from_secs(2),
            comm_reset_threshold: Duration::from_secs(2),
            hello_interval: Duration::from_millis(200),
            ..Self::default()
        }
    }

    /// Longer delay so that ticks rarely stall on slow links.
    pub fn high_latency() -> Self {
        Self {
            latency_window: 12,
            comm_warning_initial: Duration::from_secs(15),
            hello_interval: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Time per tick at `tick_rate`.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Encoded bytes of actions one tick may carry, so that a window full of such ticks
    /// still fits in one datagram of [`MAX_PACKET_SIZE`].
    #[must_use]
    pub fn tick_payload_budget(&self) -> usize {
        let ticks = 2 * self.latency_window.max(1) as usize;
        ((MAX_PACKET_SIZE - WINDOW_OVERHEAD) / ticks).saturating_sub(TICK_OVERHEAD)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ChessError::InvalidRequest` if any value is out of range.
    pub fn validate(&self) -> Result<(), ChessError> {
        if self.latency_window == 0 || self.latency_window > Self::MAX_LATENCY_WINDOW {
            return Err(ChessError::InvalidRequest {
                info: format!(
                    "latency_window must be between 1 and {}, got {}",
                    Self::MAX_LATENCY_WINDOW,
                    self.latency_window
                ),
            });
        }
        if self.replay_max_wait == 0 {
            return Err(ChessError::InvalidRequest {
                info: "replay_max_wait must be at least 1".to_owned(),
            });
        }
        if self.comm_warning_initial.is_zero() || self.comm_warning_step.is_zero() {
            return Err(ChessError::InvalidRequest {
                info: "no-communication warning intervals must be non-zero".to_owned(),
            });
        }
        if self.comm_reset_threshold > self.comm_warning_initial {
            return Err(ChessError::InvalidRequest {
                info: format!(
                    "comm_reset_threshold ({:?}) must not exceed comm_warning_initial ({:?})",
                    self.comm_reset_threshold, self.comm_warning_initial
                ),
            });
        }
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ChessError::InvalidRequest {
                info: format!("tick_rate must be between 1 and 1000, got {}", self.tick_rate),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for config in [SessionConfig::default(), SessionConfig::lan(), SessionConfig::high_latency()] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn latency_window_bounds() {
        let config = SessionConfig {
            latency_window: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
        let config = SessionConfig {
            latency_window: SessionConfig::MAX_LATENCY_WINDOW + 1,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn widest_window_still_leaves_room_per_tick() {
        let config = SessionConfig {
            latency_window: SessionConfig::MAX_LATENCY_WINDOW,
            ..SessionConfig::default()
        };
        assert!(config.tick_payload_budget() >= MIN_TICK_PAYLOAD);
        assert!(SessionConfig::lan().tick_payload_budget() > SessionConfig::default().tick_payload_budget());
        let full = 2 * config.latency_window as usize * (config.tick_payload_budget() + TICK_OVERHEAD);
        assert!(full + WINDOW_OVERHEAD <= MAX_PACKET_SIZE);
    }

    #[test]
    fn reset_threshold_cannot_exceed_first_warning() {
        let config = SessionConfig {
            comm_reset_threshold: Duration::from_secs(20),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tick_interval_at_default_rate() {
        assert_eq!(SessionConfig::default().tick_interval(), Duration::from_secs(1) / 30);
    }
}
