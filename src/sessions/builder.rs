use std::sync::Arc;

use tracing::debug;

use crate::action::Action;
use crate::model::{GameModel, KingCapturePolicy};
use crate::rules::RuleConfig;
use crate::sessions::config::SessionConfig;
use crate::sessions::lockstep_session::{KingCapturedCallback, LockstepSession, SessionSetup};
use crate::telemetry::ViolationObserver;
use crate::{ChessError, NonBlockingSocket, ParticipantId, PeerAddress, Player};

/// The [`SessionBuilder`] builds every [`LockstepSession`].
///
/// After setting all appropriate values, use one of the `start_*` / `join_*` methods to
/// consume the builder and create the session.
///
/// ```
/// use lockstep_chess::{KingCapturePolicy, Player, RuleConfig, SessionBuilder};
/// use std::net::SocketAddr;
///
/// # fn main() -> Result<(), lockstep_chess::ChessError> {
/// let mut session = SessionBuilder::<SocketAddr>::new()
///     .with_rule_config(RuleConfig::dev())
///     .with_king_capture_policy(KingCapturePolicy::Restart)
///     .with_seat(Player::new(0))
///     .with_nickname("alice")
///     .start_offline_session()?;
/// session.advance_tick()?;
/// # Ok(())
/// # }
/// ```
#[must_use = "SessionBuilder must be consumed by calling a start_*_session or join_session method"]
pub struct SessionBuilder<A: PeerAddress> {
    session_config: SessionConfig,
    rule_config: RuleConfig,
    king_capture_policy: KingCapturePolicy,
    peers: Vec<A>,
    participant_id: Option<ParticipantId>,
    seat: Option<Player>,
    nickname: Option<String>,
    /// Optional observer for protocol and rule violations.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    on_king_captured: Option<KingCapturedCallback>,
}

impl<A: PeerAddress> std::fmt::Debug for SessionBuilder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            session_config,
            rule_config,
            king_capture_policy,
            peers,
            participant_id,
            seat,
            nickname,
            violation_observer,
            on_king_captured,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("session_config", session_config)
            .field("rule_config", rule_config)
            .field("king_capture_policy", king_capture_policy)
            .field("peers", peers)
            .field("participant_id", participant_id)
            .field("seat", seat)
            .field("nickname", nickname)
            .field("has_violation_observer", &violation_observer.is_some())
            .field("has_king_captured_callback", &on_king_captured.is_some())
            .finish()
    }
}

impl<A: PeerAddress> Default for SessionBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: PeerAddress> SessionBuilder<A> {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            session_config: SessionConfig::default(),
            rule_config: RuleConfig::standard(),
            king_capture_policy: KingCapturePolicy::default(),
            peers: Vec::new(),
            participant_id: None,
            seat: None,
            nickname: None,
            violation_observer: None,
            on_king_captured: None,
        }
    }

    /// Sets the lockstep timing. Every peer of a match must use the same `latency_window`.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the rule constants. Every peer of a match must use the same rules.
    pub fn with_rule_config(mut self, config: RuleConfig) -> Self {
        self.rule_config = config;
        self
    }

    /// Chooses what happens after a King is captured. Default is
    /// [`KingCapturePolicy::StartReplay`].
    pub fn with_king_capture_policy(mut self, policy: KingCapturePolicy) -> Self {
        self.king_capture_policy = policy;
        self
    }

    /// Fixes this peer's ID instead of drawing a random one. Mostly useful in tests, where
    /// IDs decide the execution order.
    pub fn with_participant_id(mut self, id: ParticipantId) -> Self {
        self.participant_id = Some(id);
        self
    }

    /// Takes a seat once the session starts. The `become` goes through the ledger like any
    /// other action, so every peer sees it.
    pub fn with_seat(mut self, player: Player) -> Self {
        self.seat = Some(player);
        self
    }

    /// Announces a nickname once the session starts.
    pub fn with_nickname(mut self, name: impl Into<String>) -> Self {
        self.nickname = Some(name.into());
        self
    }

    /// Adds a peer that is known up front. Both peers must list each other.
    pub fn add_peer(mut self, addr: A) -> Self {
        if !self.peers.contains(&addr) {
            self.peers.push(addr);
        }
        self
    }

    /// Sets a custom observer for protocol and rule violations. Without one, violations
    /// are logged through `tracing`.
    ///
    /// ```
    /// use lockstep_chess::{telemetry::CollectingObserver, SessionBuilder};
    /// use std::net::SocketAddr;
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = SessionBuilder::<SocketAddr>::new()
    ///     .with_violation_observer(observer.clone());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Registers a callback run with the losing player whenever a King falls in live play.
    /// Replays do not call it again.
    pub fn with_king_captured_callback(mut self, callback: impl FnMut(Player) + 'static) -> Self {
        self.on_king_captured = Some(Box::new(callback));
        self
    }

    /// Consumes the builder to construct a [`LockstepSession`] that exchanges ticks over
    /// `socket`. Without peers the session ticks alone and welcomes whoever joins.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a configuration value is out of range, the seat
    ///   does not exist, or the nickname does not fit in a tick.
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    pub fn start_p2p_session(
        self,
        socket: impl NonBlockingSocket<A> + 'static,
    ) -> Result<LockstepSession<A>, ChessError> {
        self.build(Some(Box::new(socket)), None, false)
    }

    /// Like [`start_p2p_session`](Self::start_p2p_session), but without peers the session
    /// holds at tick zero until discovery hands it one through
    /// [`LockstepSession::add_peer`]. Both sides of a discovered match start together.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a configuration value is out of range, the seat
    ///   does not exist, or the nickname does not fit in a tick.
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    pub fn start_discovery_session(
        self,
        socket: impl NonBlockingSocket<A> + 'static,
    ) -> Result<LockstepSession<A>, ChessError> {
        self.build(Some(Box::new(socket)), None, true)
    }

    /// Consumes the builder to construct a [`LockstepSession`] with no network. Every tick
    /// is ready as soon as the local list for it exists.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a configuration value is out of range, the seat does
    ///   not exist, or peers were added.
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    pub fn start_offline_session(self) -> Result<LockstepSession<A>, ChessError> {
        if !self.peers.is_empty() {
            return Err(ChessError::InvalidRequest {
                info: "an offline session cannot have peers".to_owned(),
            });
        }
        self.build(None, None, false)
    }

    /// Consumes the builder to construct a [`LockstepSession`] that joins the running match
    /// `host` belongs to. The session sends hellos to `host` until its welcome arrives,
    /// then fast-forwards to the welcome's tick.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a configuration value is out of range, the seat does
    ///   not exist, or peers were added.
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    pub fn join_session(
        self,
        socket: impl NonBlockingSocket<A> + 'static,
        host: A,
    ) -> Result<LockstepSession<A>, ChessError> {
        if !self.peers.is_empty() {
            return Err(ChessError::InvalidRequest {
                info: "a joining session learns its peers from the welcome".to_owned(),
            });
        }
        self.build(Some(Box::new(socket)), Some(host), false)
    }

    fn build(
        self,
        socket: Option<Box<dyn NonBlockingSocket<A>>>,
        join_host: Option<A>,
        await_peers: bool,
    ) -> Result<LockstepSession<A>, ChessError> {
        self.session_config.validate()?;
        self.rule_config.validate()?;
        if let Some(seat) = self.seat {
            if seat.index() >= self.rule_config.num_boards * 2 {
                return Err(ChessError::InvalidRequest {
                    info: format!("no such seat {} on {} board(s)", seat, self.rule_config.num_boards),
                });
            }
        }

        let mut initial_actions = Vec::new();
        if let Some(name) = self.nickname {
            let nick = Action::Nick { name };
            let budget = self.session_config.tick_payload_budget();
            if nick.encoded_len() > budget {
                return Err(ChessError::InvalidRequest {
                    info: format!("nickname is {} bytes on the wire, at most {budget} fit in a tick", nick.encoded_len()),
                });
            }
            initial_actions.push(nick);
        }
        if let Some(seat) = self.seat {
            initial_actions.push(Action::Become { player: Some(seat) });
        }

        let local_id = self.participant_id.unwrap_or_else(ParticipantId::random);
        debug!(participant = %local_id, peers = self.peers.len(), "building session");

        Ok(LockstepSession::new(SessionSetup {
            config: self.session_config,
            model: GameModel::new(self.rule_config, self.king_capture_policy),
            local_id,
            socket,
            peers: self.peers,
            join_host,
            await_peers,
            initial_actions,
            on_king_captured: self.on_king_captured,
            violation_observer: self.violation_observer,
        }))
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
    use crate::{SessionState, Tick};
    use web_time::Duration;

    #[test]
    fn defaults() {
        let builder = SessionBuilder::<u8>::new();
        assert_eq!(builder.session_config, SessionConfig::default());
        assert_eq!(builder.rule_config, RuleConfig::standard());
        assert_eq!(builder.king_capture_policy, KingCapturePolicy::StartReplay);
        assert!(builder.peers.is_empty());
    }

    #[test]
    fn duplicate_peers_are_collapsed() {
        let builder = SessionBuilder::<u8>::new().add_peer(3).add_peer(3).add_peer(4);
        assert_eq!(builder.peers, vec![3, 4]);
    }

    #[test]
    fn invalid_session_config_is_rejected() {
        let result = SessionBuilder::<u8>::new()
            .with_session_config(SessionConfig {
                latency_window: 0,
                ..SessionConfig::default()
            })
            .start_offline_session();
        assert!(matches!(result, Err(ChessError::InvalidRequest { .. })));
    }

    #[test]
    fn invalid_rule_config_is_rejected() {
        let result = SessionBuilder::<u8>::new()
            .with_rule_config(RuleConfig {
                num_boards: 3,
                ..RuleConfig::standard()
            })
            .start_offline_session();
        assert!(result.is_err());
    }

    #[test]
    fn seat_must_exist() {
        let result = SessionBuilder::<u8>::new()
            .with_seat(Player::new(2))
            .start_offline_session();
        assert!(result.is_err());
        let result = SessionBuilder::<u8>::new()
            .with_rule_config(RuleConfig {
                num_boards: 2,
                ..RuleConfig::standard()
            })
            .with_seat(Player::new(3))
            .start_offline_session();
        assert!(result.is_ok());
    }

    #[test]
    fn offline_session_rejects_peers() {
        let result = SessionBuilder::<u8>::new().add_peer(1).start_offline_session();
        assert!(result.is_err());
    }

    #[test]
    fn seat_and_nickname_are_queued_as_actions() {
        let session = SessionBuilder::<u8>::new()
            .with_seat(Player::new(1))
            .with_nickname("bo")
            .start_offline_session()
            .unwrap();
        assert_eq!(session.queued_actions(), &[
            Action::Nick {
                name: "bo".to_owned()
            },
            Action::Become {
                player: Some(Player::new(1))
            },
        ]);
        assert_eq!(session.current_state(), SessionState::Running);
        assert_eq!(session.tick(), Tick::ZERO);
    }

    #[test]
    fn fixed_participant_id_is_used() {
        let session = SessionBuilder::<u8>::new()
            .with_participant_id(ParticipantId::new(77))
            .start_offline_session()
            .unwrap();
        assert_eq!(session.local_participant(), ParticipantId::new(77));
    }

    #[test]
    fn session_config_is_carried_over() {
        let config = SessionConfig {
            hello_interval: Duration::from_millis(50),
            ..SessionConfig::lan()
        };
        let session = SessionBuilder::<u8>::new()
            .with_session_config(config)
            .start_offline_session()
            .unwrap();
        assert_eq!(session.config(), &config);
    }

    #[test]
    fn nickname_must_fit_in_a_tick() {
        let result = SessionBuilder::<u8>::new()
            .with_nickname("n".repeat(SessionConfig::default().tick_payload_budget()))
            .start_offline_session();
        assert!(matches!(result, Err(ChessError::InvalidRequest { .. })));
        let result = SessionBuilder::<u8>::new()
            .with_nickname("n".repeat(64))
            .start_offline_session();
        assert!(result.is_ok());
    }

    #[test]
    fn debug_does_not_leak_callbacks() {
        let builder = SessionBuilder::<u8>::new().with_king_captured_callback(|_| {});
        let text = format!("{:?}", builder);
        assert!(text.contains("has_king_captured_callback: true"));
    }
}
