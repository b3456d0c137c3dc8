//! Where the lockstep loop stands right now.

use crate::{ParticipantId, Tick};

/// Health of the lockstep loop, as reported by [`LockstepSession::sync_health`].
///
/// ```ignore
/// match session.sync_health() {
///     SyncHealth::WaitingForPeers { tick, missing } => {
///         status_bar.set(format!("waiting on {} peers at tick {}", missing.len(), tick));
///     }
///     SyncHealth::Halted { tick } => panic!("peers diverged at tick {}", tick),
///     _ => {}
/// }
/// ```
///
/// [`LockstepSession::sync_health`]: crate::LockstepSession::sync_health
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncHealth {
    /// The current tick is ready, or no peers are expected.
    Running,
    /// The current tick cannot run until these participants' entries arrive.
    ///
    /// Peers that have never sent anything are not known by ID yet; `missing` then has
    /// fewer elements than the number of silent peers.
    WaitingForPeers {
        /// The blocked tick.
        tick: Tick,
        /// Known participants with no entry for `tick`.
        missing: Vec<ParticipantId>,
    },
    /// Re-running recorded ticks; live play resumes at `stop`.
    Replaying {
        /// The tick being replayed.
        tick: Tick,
        /// The live frontier.
        stop: Tick,
    },
    /// A participant contradicted its own ledger entry. Nothing runs any more.
    Halted {
        /// The tick the session stopped at.
        tick: Tick,
    },
}

impl SyncHealth {
    /// Whether the next `advance_tick` can make progress.
    #[must_use]
    pub const fn can_advance(&self) -> bool {
        matches!(self, Self::Running | Self::Replaying { .. })
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
    fn only_running_and_replaying_advance() {
        assert!(SyncHealth::Running.can_advance());
        assert!(SyncHealth::Replaying {
            tick: Tick::new(3),
            stop: Tick::new(9)
        }
        .can_advance());
        assert!(!SyncHealth::WaitingForPeers {
            tick: Tick::new(3),
            missing: vec![ParticipantId::new(1)]
        }
        .can_advance());
        assert!(!SyncHealth::Halted { tick: Tick::new(3) }.can_advance());
    }
}
