//! Replay of the current match from the ledger.
//!
//! Replay re-runs recorded ticks from the start of the match up to the live frontier.
//! It reads the ledger and never writes it, so peers that are not replaying are not
//! affected. The controller only keeps the cursor bookkeeping; the session executes the
//! ticks.

use tracing::debug;

use crate::Tick;

/// Whether the session is playing live or re-running history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayState {
    /// Ticks execute as soon as every participant's entry has arrived.
    #[default]
    Live,
    /// Recorded ticks are re-executed without gating.
    Replaying {
        /// The live frontier. Reaching it ends the replay.
        stop: Tick,
        /// Consecutive empty ticks stepped through since the last skip.
        idle_wait: u32,
    },
}

/// Replay cursor bookkeeping.
///
/// ```
/// use lockstep_chess::{ReplayController, ReplayState, Tick};
///
/// let mut replay = ReplayController::new(30);
/// replay.set_last_start(Tick::new(10));
/// assert!(replay.request());
///
/// // The request is consumed after the tick that raised it has run.
/// assert_eq!(replay.begin_if_requested(Tick::new(50)), Some(Tick::new(10)));
/// assert_eq!(replay.stop(), Some(Tick::new(50)));
///
/// // Requests are ignored while a replay runs.
/// assert!(!replay.request());
/// assert!(replay.finish_if_reached(Tick::new(50)));
/// assert_eq!(replay.state(), ReplayState::Live);
/// assert_eq!(replay.last_start(), Tick::new(50));
/// ```
#[derive(Debug, Clone)]
pub struct ReplayController {
    state: ReplayState,
    last_start: Tick,
    requested: bool,
    max_wait: u32,
}

impl ReplayController {
    /// A live controller that steps through at most `max_wait` empty ticks before skipping.
    #[must_use]
    pub fn new(max_wait: u32) -> Self {
        Self {
            state: ReplayState::Live,
            last_start: Tick::ZERO,
            requested: false,
            max_wait: max_wait.max(1),
        }
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> ReplayState {
        self.state
    }

    /// Whether a replay is running.
    #[must_use]
    pub const fn is_replaying(&self) -> bool {
        matches!(self.state, ReplayState::Replaying { .. })
    }

    /// The live frontier of the running replay.
    #[must_use]
    pub const fn stop(&self) -> Option<Tick> {
        match self.state {
            ReplayState::Replaying { stop, .. } => Some(stop),
            ReplayState::Live => None,
        }
    }

    /// First tick of the current match; replays rewind to it.
    #[must_use]
    pub const fn last_start(&self) -> Tick {
        self.last_start
    }

    /// Records where the current match began.
    pub fn set_last_start(&mut self, tick: Tick) {
        self.last_start = tick;
    }

    /// Whether a replay has been requested and not yet started.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        self.requested
    }

    /// Asks for a replay after the current tick. Returns `false` if one is already running.
    pub fn request(&mut self) -> bool {
        if self.is_replaying() {
            return false;
        }
        self.requested = true;
        true
    }

    /// Consumes the request latch. If it was set, play is live and the match has at least
    /// one tick behind it, enters replay with `tick` as the frontier and returns the tick to
    /// rewind to.
    pub fn begin_if_requested(&mut self, tick: Tick) -> Option<Tick> {
        if !std::mem::take(&mut self.requested) || self.is_replaying() {
            return None;
        }
        if self.last_start >= tick {
            debug!(%tick, last_start = %self.last_start, "nothing to replay");
            return None;
        }
        debug!(from = %self.last_start, to = %tick, "replay started");
        self.state = ReplayState::Replaying {
            stop: tick,
            idle_wait: 0,
        };
        Some(self.last_start)
    }

    /// Notes that the replayed tick had actions.
    pub fn note_busy_tick(&mut self) {
        if let ReplayState::Replaying { idle_wait, .. } = &mut self.state {
            *idle_wait = 0;
        }
    }

    /// Notes an empty replayed tick. Returns `true` once `max_wait` empty ticks have
    /// passed in a row, at which point the caller should skip ahead.
    pub fn note_empty_tick(&mut self) -> bool {
        let ReplayState::Replaying { idle_wait, .. } = &mut self.state else {
            return false;
        };
        *idle_wait += 1;
        if *idle_wait >= self.max_wait {
            *idle_wait = 0;
            return true;
        }
        false
    }

    /// Ends the replay if `tick` has reached the frontier. The new match starts at `tick`.
    pub fn finish_if_reached(&mut self, tick: Tick) -> bool {
        match self.state {
            ReplayState::Replaying { stop, .. } if tick >= stop => {
                debug!(%tick, "replay finished");
                self.state = ReplayState::Live;
                self.last_start = tick;
                true
            },
            _ => false,
        }
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
    fn latch_is_consumed_once() {
        let mut replay = ReplayController::new(30);
        assert_eq!(replay.begin_if_requested(Tick::new(5)), None);
        replay.request();
        assert!(replay.is_requested());
        assert_eq!(replay.begin_if_requested(Tick::new(5)), Some(Tick::ZERO));
        assert!(!replay.is_requested());
        assert!(replay.is_replaying());
    }

    #[test]
    fn requests_while_replaying_are_ignored() {
        let mut replay = ReplayController::new(30);
        replay.request();
        let _ = replay.begin_if_requested(Tick::new(20));
        assert!(!replay.request());
        assert_eq!(replay.begin_if_requested(Tick::new(7)), None);
        assert_eq!(replay.stop(), Some(Tick::new(20)));
    }

    #[test]
    fn match_without_ticks_is_not_replayed() {
        let mut replay = ReplayController::new(30);
        replay.set_last_start(Tick::new(16));
        replay.request();
        assert_eq!(replay.begin_if_requested(Tick::new(16)), None);
        assert!(!replay.is_requested());
        assert_eq!(replay.state(), ReplayState::Live);
        replay.request();
        assert_eq!(replay.begin_if_requested(Tick::new(17)), Some(Tick::new(16)));
    }

    #[test]
    fn skips_after_max_wait_empty_ticks() {
        let mut replay = ReplayController::new(3);
        replay.request();
        let _ = replay.begin_if_requested(Tick::new(100));
        assert!(!replay.note_empty_tick());
        assert!(!replay.note_empty_tick());
        assert!(replay.note_empty_tick());
        assert!(!replay.note_empty_tick());
        replay.note_busy_tick();
        assert!(matches!(replay.state(), ReplayState::Replaying { idle_wait: 0, .. }));
    }

    #[test]
    fn live_controller_never_skips() {
        let mut replay = ReplayController::new(1);
        assert!(!replay.note_empty_tick());
        assert!(!replay.finish_if_reached(Tick::new(1000)));
    }

    #[test]
    fn finishing_moves_match_start_to_frontier() {
        let mut replay = ReplayController::new(30);
        replay.set_last_start(Tick::new(4));
        replay.request();
        let _ = replay.begin_if_requested(Tick::new(40));
        assert!(!replay.finish_if_reached(Tick::new(39)));
        assert!(replay.finish_if_reached(Tick::new(40)));
        assert_eq!(replay.last_start(), Tick::new(40));
        assert_eq!(replay.state(), ReplayState::Live);
    }
}
