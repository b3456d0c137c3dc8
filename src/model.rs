//! Match-level state on top of the rule engine: who sits where, what they are called, the
//! score, and the handlers that turn ledger actions into board changes and messages.
//!
//! The model knows nothing about the network. Actions that need the session (joining peers,
//! leaving a replay) are handled there; everything else goes through [`GameModel::apply`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::action::Action;
use crate::error::ChessError;
use crate::rules::{Game, MoveOutcome, Rejection, RuleConfig};
use crate::{ParticipantId, Player, Tick};

const CREDITS: &str = "Programming: Yair Chuchem\nChess sets/Graphics: Cburnett\ngithub.com/yairchu/chess2";
const HELP: &str =
    "commands: /help | /nick <name> | /become [seat] | /reset [boards] | /surrender | /replay | /endreplay | /credits";

/// What happens after a King is captured in live play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KingCapturePolicy {
    /// Replay the match from its start, then begin a fresh one.
    #[default]
    StartReplay,
    /// Begin a fresh match straight away.
    Restart,
    /// Only report the capture; the board stays as it is.
    Notify,
}

/// Things the model wants the session to know after an action ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    Message(String),
    KingCaptured(Player),
    MatchStarted { tick: Tick, num_boards: u8 },
    ReplayRequested,
}

/// The game as seen by every participant: the board plus seats, names, and score.
#[derive(Debug, Clone)]
pub struct GameModel {
    game: Game,
    policy: KingCapturePolicy,
    players: BTreeMap<ParticipantId, Player>,
    nicknames: BTreeMap<ParticipantId, String>,
    score: [u32; 2],
    replaying: bool,
    notices: Vec<Notice>,
}

impl GameModel {
    /// A model with a fresh board.
    #[must_use]
    pub fn new(rules: RuleConfig, policy: KingCapturePolicy) -> Self {
        Self {
            game: Game::new(rules),
            policy,
            players: BTreeMap::new(),
            nicknames: BTreeMap::new(),
            score: [0; 2],
            replaying: false,
            notices: Vec::new(),
        }
    }

    /// The rule engine.
    #[must_use]
    pub const fn game(&self) -> &Game {
        &self.game
    }

    /// Wins per side, White first.
    #[must_use]
    pub const fn score(&self) -> [u32; 2] {
        self.score
    }

    /// The seat `participant` has taken.
    #[must_use]
    pub fn player_of(&self, participant: ParticipantId) -> Option<Player> {
        self.players.get(&participant).copied()
    }

    /// Seats a participant directly. Seats decide who may surrender, so outside tests they
    /// only change through ledger actions.
    pub(crate) fn seat(&mut self, participant: ParticipantId, player: Option<Player>) {
        match player {
            Some(player) => self.players.insert(participant, player),
            None => self.players.remove(&participant),
        };
    }

    /// `"White"` or `"Black"`, with the board number when several boards are in play.
    #[must_use]
    pub fn player_str(&self, player: Player) -> String {
        let side = side_name(player.side());
        if self.game.num_boards() > 1 {
            format!("{}#{}", side, player.board())
        } else {
            side.to_owned()
        }
    }

    /// The nickname `participant` chose, if any.
    #[must_use]
    pub fn nickname(&self, participant: ParticipantId) -> Option<&str> {
        self.nicknames.get(&participant).map(String::as_str)
    }

    /// The name shown for `participant`: nickname, else seat, else `"Spectator"`.
    #[must_use]
    pub fn nick(&self, participant: ParticipantId) -> String {
        if let Some(name) = self.nicknames.get(&participant) {
            return name.clone();
        }
        self.player_of(participant)
            .map_or_else(|| "Spectator".to_owned(), |p| self.player_str(p))
    }

    pub(crate) fn set_tick(&mut self, tick: Tick) {
        self.game.set_tick(tick);
    }

    pub(crate) fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    /// Starts a fresh board. `tick` is where the new match begins.
    pub(crate) fn start_match(&mut self, tick: Tick, num_boards: Option<u8>) {
        self.game.reset(num_boards);
        let num_boards = self.game.num_boards();
        debug!(%tick, num_boards, "match started");
        self.notices.push(Notice::MatchStarted { tick, num_boards });
    }

    /// Puts every peer, the joiner included, on the same footing after a welcome: a fresh
    /// board of `num_boards`, no seats and no score. A joiner has no history to rebuild
    /// either from.
    pub(crate) fn start_welcomed_match(&mut self, tick: Tick, num_boards: u8) -> Result<(), ChessError> {
        if num_boards == 0 || num_boards > RuleConfig::MAX_BOARDS {
            return Err(ChessError::invalid_action(
                "welcome",
                format!("boards must be between 1 and {}", RuleConfig::MAX_BOARDS),
            ));
        }
        if !self.replaying {
            self.players.clear();
            self.score = [0; 2];
        }
        self.start_match(tick, Some(num_boards));
        Ok(())
    }

    /// Resets the board without announcing a new match, as replay does when it rewinds.
    pub(crate) fn reinit_board(&mut self) {
        self.game.reset(None);
    }

    pub(crate) fn drain_notices(&mut self) -> std::vec::Drain<'_, Notice> {
        self.notices.drain(..)
    }

    pub(crate) fn message(&mut self, text: impl Into<String>) {
        self.notices.push(Notice::Message(text.into()));
    }

    /// Runs one action from the ledger on behalf of `participant`.
    ///
    /// Welcome and end-replay are no-ops here; the session handles them before they reach
    /// the model. An `Err` leaves the board as it was.
    pub fn apply(&mut self, participant: ParticipantId, action: &Action) -> Result<(), ChessError> {
        match action {
            Action::Move { src, dst } => self.action_move(*src, *dst),
            Action::Reset { num_boards } => self.action_reset(*num_boards),
            Action::Become { player } => self.action_become(participant, *player),
            Action::Msg { text } => {
                let line = format!("{}: {}", self.nick(participant), text);
                self.message(line);
                Ok(())
            },
            Action::Nick { name } => {
                let line = format!("{} renames to {}", self.nick(participant), name);
                self.message(line);
                self.nicknames.insert(participant, name.clone());
                Ok(())
            },
            Action::Credits => {
                self.message(CREDITS);
                Ok(())
            },
            Action::Help => {
                self.message(HELP);
                Ok(())
            },
            Action::Surrender => self.action_surrender(participant),
            Action::Replay => {
                self.notices.push(Notice::ReplayRequested);
                Ok(())
            },
            Action::EndReplay | Action::Welcome { .. } => Ok(()),
            Action::Unknown { verb, .. } if Action::is_known_verb(verb) => {
                Err(ChessError::invalid_action(verb.as_str(), "unreadable parameters"))
            },
            Action::Unknown { verb, .. } => {
                self.message(format!("{}: no such action", verb));
                Ok(())
            },
        }
    }

    fn action_move(&mut self, src: crate::Coord, dst: crate::Coord) -> Result<(), ChessError> {
        match self.game.move_piece(src, dst) {
            MoveOutcome::Moved(report) => {
                let line = format!("{} {} moved", self.player_str(report.player), report.kind.name());
                self.message(line);
                for &player in &report.kings_captured {
                    self.king_captured(player);
                }
                Ok(())
            },
            MoveOutcome::Rejected(why) => {
                let reason = match why {
                    Rejection::NoPiece => format!("no piece on {}", src),
                    Rejection::Stale => format!("piece on {} changed", src),
                    Rejection::Frozen => format!("piece on {} is frozen", src),
                    Rejection::Illegal => format!("{} cannot reach {}", src, dst),
                };
                Err(ChessError::invalid_action("move", reason))
            },
        }
    }

    fn action_reset(&mut self, num_boards: Option<u8>) -> Result<(), ChessError> {
        if let Some(n) = num_boards {
            if n == 0 || n > RuleConfig::MAX_BOARDS {
                return Err(ChessError::invalid_action(
                    "reset",
                    format!("boards must be between 1 and {}", RuleConfig::MAX_BOARDS),
                ));
            }
        }
        self.start_match(self.game.tick() + 1, num_boards);
        Ok(())
    }

    fn action_become(&mut self, participant: ParticipantId, player: Option<Player>) -> Result<(), ChessError> {
        if let Some(p) = player {
            if p.index() >= self.game.num_players() {
                return Err(ChessError::invalid_action("become", format!("no such player {}", p.index())));
            }
        }
        let seat = player.map_or_else(|| "Spectator".to_owned(), |p| self.player_str(p));
        let line = format!("{} becomes {}", self.nick(participant), seat);
        self.message(line);
        self.seat(participant, player);
        Ok(())
    }

    fn action_surrender(&mut self, participant: ParticipantId) -> Result<(), ChessError> {
        let Some(player) = self.player_of(participant) else {
            return Err(ChessError::invalid_action("surrender", "spectators cannot surrender"));
        };
        let line = format!("{} surrendered", self.nick(participant));
        self.message(line);
        self.king_captured(player);
        Ok(())
    }

    /// Scores the capture and applies the policy. During replay only the messages repeat.
    fn king_captured(&mut self, loser: Player) {
        let winner = 1 - loser.side();
        let line = format!("{} King Captured!", self.player_str(loser));
        self.message(line);
        self.message(format!("{} wins!", side_name(winner)));
        self.notices.push(Notice::KingCaptured(loser));
        if self.replaying {
            return;
        }
        self.score[usize::from(winner)] += 1;
        match self.policy {
            KingCapturePolicy::StartReplay => self.notices.push(Notice::ReplayRequested),
            KingCapturePolicy::Restart => self.start_match(self.game.tick() + 1, None),
            KingCapturePolicy::Notify => {},
        }
    }
}

const fn side_name(side: u8) -> &'static str {
    if side == 0 {
        "White"
    } else {
        "Black"
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

    const ME: ParticipantId = ParticipantId::new(1);

    fn messages(model: &mut GameModel) -> Vec<String> {
        model
            .drain_notices()
            .filter_map(|n| match n {
                Notice::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nick_falls_back_to_seat_then_spectator() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        assert_eq!(model.nick(ME), "Spectator");
        model.seat(ME, Some(Player::new(1)));
        assert_eq!(model.nick(ME), "Black");
        model.apply(ME, &Action::Nick { name: "bob".to_owned() }).unwrap();
        assert_eq!(model.nick(ME), "bob");
        assert_eq!(messages(&mut model), vec!["Black renames to bob"]);
    }

    #[test]
    fn player_str_names_board_when_several() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        assert_eq!(model.player_str(Player::new(2)), "White");
        model.apply(ME, &Action::Reset { num_boards: Some(2) }).unwrap();
        assert_eq!(model.player_str(Player::new(3)), "Black#1");
    }

    #[test]
    fn become_rejects_missing_seat() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        let err = model
            .apply(ME, &Action::Become { player: Some(Player::new(2)) })
            .unwrap_err();
        assert_eq!(err.to_string(), "action become failed: no such player 2");
    }

    #[test]
    fn move_reports_kind() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        model
            .apply(ME, &Action::Move { src: Coord::new(1, 0), dst: Coord::new(2, 2) })
            .unwrap();
        assert_eq!(messages(&mut model), vec!["White knight moved"]);
    }

    #[test]
    fn surrender_scores_for_the_other_side() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::StartReplay);
        model.seat(ME, Some(Player::new(0)));
        model.apply(ME, &Action::Surrender).unwrap();
        assert_eq!(model.score(), [0, 1]);
        let notices: Vec<_> = model.drain_notices().collect();
        assert!(notices.contains(&Notice::Message("White King Captured!".to_owned())));
        assert!(notices.contains(&Notice::Message("Black wins!".to_owned())));
        assert!(notices.contains(&Notice::ReplayRequested));
    }

    #[test]
    fn replayed_capture_does_not_score() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::StartReplay);
        model.seat(ME, Some(Player::new(1)));
        model.set_replaying(true);
        model.apply(ME, &Action::Surrender).unwrap();
        assert_eq!(model.score(), [0, 0]);
        assert!(!model.drain_notices().any(|n| n == Notice::ReplayRequested));
    }

    #[test]
    fn restart_policy_starts_next_tick() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Restart);
        model.set_tick(Tick::new(40));
        model.seat(ME, Some(Player::new(0)));
        model.apply(ME, &Action::Surrender).unwrap();
        assert!(model.drain_notices().any(|n| n
            == Notice::MatchStarted {
                tick: Tick::new(41),
                num_boards: 1
            }));
    }

    #[test]
    fn welcome_clears_seats_and_score_and_sets_boards() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        model.seat(ME, Some(Player::new(0)));
        model.apply(ME, &Action::Surrender).unwrap();
        assert_eq!(model.score(), [0, 1]);
        model.apply(ME, &Action::Reset { num_boards: Some(2) }).unwrap();

        model.start_welcomed_match(Tick::new(9), 1).unwrap();
        assert_eq!(model.player_of(ME), None);
        assert_eq!(model.score(), [0, 0]);
        assert_eq!(model.game().num_boards(), 1);
        assert!(model.apply(ME, &Action::Surrender).is_err());
        assert!(model.start_welcomed_match(Tick::new(9), 3).is_err());
    }

    #[test]
    fn unknown_verbs_are_reported() {
        let mut model = GameModel::new(RuleConfig::dev(), KingCapturePolicy::Notify);
        let dance = Action::Unknown {
            verb: "dance".to_owned(),
            params: vec![],
        };
        model.apply(ME, &dance).unwrap();
        assert_eq!(messages(&mut model), vec!["dance: no such action"]);
    }
}
