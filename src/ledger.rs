//! The iteration ledger: every participant's action list for every tick.
//!
//! Entries are write-once. A participant announces its list for a tick many times (every
//! outbound window repeats it), so re-inserting an identical list is a no-op. A different
//! list for a recorded `(tick, participant)` pair means the peers have diverged; the ledger
//! keeps the original entry and reports [`MergeOutcome::Conflict`].
//!
//! The ledger is the input to both live execution and replay, so it is never pruned while a
//! session runs.

use std::collections::BTreeMap;

use crate::action::Action;
use crate::{ParticipantId, Tick};

/// Result of [`IterationLedger::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum MergeOutcome {
    /// The pair was absent and is now recorded.
    Inserted,
    /// The pair was already recorded with the same list.
    Duplicate,
    /// The pair was already recorded with a different list. Nothing changed.
    Conflict,
}

/// `tick -> participant -> [Action]`, ordered on both levels.
///
/// ```
/// use lockstep_chess::{Action, IterationLedger, MergeOutcome, ParticipantId, Tick};
///
/// let mut ledger = IterationLedger::new();
/// let me = ParticipantId::new(1);
/// let list = vec![Action::Help];
/// assert_eq!(ledger.insert(Tick::new(5), me, list.clone()), MergeOutcome::Inserted);
/// assert_eq!(ledger.insert(Tick::new(5), me, list), MergeOutcome::Duplicate);
/// assert_eq!(ledger.insert(Tick::new(5), me, vec![]), MergeOutcome::Conflict);
/// assert_eq!(ledger.participants_at(Tick::new(5)), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationLedger {
    ticks: BTreeMap<Tick, BTreeMap<ParticipantId, Vec<Action>>>,
}

impl IterationLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `actions` for `(tick, participant)` unless the pair is already present.
    pub fn insert(&mut self, tick: Tick, participant: ParticipantId, actions: Vec<Action>) -> MergeOutcome {
        let entries = self.ticks.entry(tick).or_default();
        match entries.get(&participant) {
            None => {
                entries.insert(participant, actions);
                MergeOutcome::Inserted
            },
            Some(existing) if *existing == actions => MergeOutcome::Duplicate,
            Some(_) => MergeOutcome::Conflict,
        }
    }

    /// The list recorded for `(tick, participant)`.
    #[must_use]
    pub fn get(&self, tick: Tick, participant: ParticipantId) -> Option<&[Action]> {
        self.ticks
            .get(&tick)
            .and_then(|entries| entries.get(&participant))
            .map(Vec::as_slice)
    }

    /// Whether `(tick, participant)` has an entry, possibly empty.
    #[must_use]
    pub fn contains(&self, tick: Tick, participant: ParticipantId) -> bool {
        self.get(tick, participant).is_some()
    }

    /// Distinct participants with an entry for `tick`.
    #[must_use]
    pub fn participants_at(&self, tick: Tick) -> usize {
        self.ticks.get(&tick).map_or(0, BTreeMap::len)
    }

    /// Participants with an entry for `tick`, ascending.
    pub fn participants(&self, tick: Tick) -> impl Iterator<Item = ParticipantId> + '_ {
        self.ticks
            .get(&tick)
            .into_iter()
            .flat_map(|entries| entries.keys().copied())
    }

    /// Every action for `tick` in execution order: participants ascending, then queue order.
    pub fn actions_at(&self, tick: Tick) -> impl Iterator<Item = (ParticipantId, &Action)> + '_ {
        self.ticks.get(&tick).into_iter().flat_map(|entries| {
            entries
                .iter()
                .flat_map(|(&participant, actions)| actions.iter().map(move |a| (participant, a)))
        })
    }

    /// Whether any participant recorded a non-empty list for `tick`.
    #[must_use]
    pub fn has_actions(&self, tick: Tick) -> bool {
        self.ticks
            .get(&tick)
            .is_some_and(|entries| entries.values().any(|actions| !actions.is_empty()))
    }

    /// `participant`'s recorded lists for ticks in `[from, to)`, skipping ticks it has no entry for.
    #[must_use]
    pub fn window(&self, participant: ParticipantId, from: Tick, to: Tick) -> Vec<(Tick, Vec<Action>)> {
        self.ticks
            .range(from..to)
            .filter_map(|(&tick, entries)| entries.get(&participant).map(|actions| (tick, actions.clone())))
            .collect()
    }

    /// Highest tick with any entry.
    #[must_use]
    pub fn last_tick(&self) -> Option<Tick> {
        self.ticks.keys().next_back().copied()
    }

    /// Number of ticks with at least one entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Forgets everything. Only a joiner adopting a running match does this.
    pub fn clear(&mut self) {
        self.ticks.clear();
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
    use crate::rules::Coord;

    const A: ParticipantId = ParticipantId::new(10);
    const B: ParticipantId = ParticipantId::new(3);

    fn mv(x: i32) -> Action {
        Action::Move {
            src: Coord::new(x, 1),
            dst: Coord::new(x, 2),
        }
    }

    #[test]
    fn conflict_keeps_original_entry() {
        let mut ledger = IterationLedger::new();
        let _ = ledger.insert(Tick::new(7), A, vec![mv(0)]);
        assert_eq!(ledger.insert(Tick::new(7), A, vec![mv(1)]), MergeOutcome::Conflict);
        assert_eq!(ledger.get(Tick::new(7), A), Some(&[mv(0)][..]));
    }

    #[test]
    fn actions_run_in_participant_order() {
        let mut ledger = IterationLedger::new();
        let _ = ledger.insert(Tick::new(7), A, vec![mv(0), mv(1)]);
        let _ = ledger.insert(Tick::new(7), B, vec![mv(2)]);
        let order: Vec<_> = ledger.actions_at(Tick::new(7)).collect();
        assert_eq!(order, vec![(B, &mv(2)), (A, &mv(0)), (A, &mv(1))]);
    }

    #[test]
    fn empty_lists_count_as_entries_but_not_actions() {
        let mut ledger = IterationLedger::new();
        let _ = ledger.insert(Tick::new(2), A, vec![]);
        assert!(ledger.contains(Tick::new(2), A));
        assert_eq!(ledger.participants_at(Tick::new(2)), 1);
        assert!(!ledger.has_actions(Tick::new(2)));
        assert!(!ledger.has_actions(Tick::new(3)));
    }

    #[test]
    fn window_only_reads_own_entries() {
        let mut ledger = IterationLedger::new();
        for t in 0..6 {
            let _ = ledger.insert(Tick::new(t), A, vec![]);
        }
        let _ = ledger.insert(Tick::new(4), B, vec![mv(3)]);
        let window = ledger.window(A, Tick::new(2), Tick::new(8));
        assert_eq!(window.iter().map(|(t, _)| t.as_u32()).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert!(ledger.get(Tick::new(7), A).is_none());
        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger.last_tick(), Some(Tick::new(5)));
    }
}
