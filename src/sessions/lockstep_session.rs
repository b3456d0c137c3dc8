use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace};
use web_time::{Duration, Instant};

use crate::action::Action;
use crate::error::ChessError;
use crate::ledger::{IterationLedger, MergeOutcome};
use crate::model::{GameModel, Notice};
use crate::network::discovery::{DiscoveryEvent, DiscoveryWorker};
use crate::network::messages::{Packet, PacketBody};
use crate::rules::Game;
use crate::sessions::config::SessionConfig;
use crate::sessions::event_drain::EventDrain;
use crate::sessions::replay::{ReplayController, ReplayState};
use crate::sessions::sync_health::SyncHealth;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    report_violation_to, ChessEvent, NonBlockingSocket, ParticipantId, PeerAddress, Player,
    SessionState, Tick,
};

/// Maximum number of events to queue before oldest are dropped.
const MAX_EVENT_QUEUE_SIZE: usize = 256;

/// Called with the losing player whenever a King falls in live play.
pub(crate) type KingCapturedCallback = Box<dyn FnMut(Player)>;

/// Everything the builder hands over to start a session.
pub(crate) struct SessionSetup<A: PeerAddress> {
    pub config: SessionConfig,
    pub model: GameModel,
    pub local_id: ParticipantId,
    pub socket: Option<Box<dyn NonBlockingSocket<A>>>,
    pub peers: Vec<A>,
    pub join_host: Option<A>,
    /// Wait for peers from discovery instead of ticking alone.
    pub await_peers: bool,
    pub initial_actions: Vec<Action>,
    pub on_king_captured: Option<KingCapturedCallback>,
    pub violation_observer: Option<Arc<dyn ViolationObserver>>,
}

/// Tracks silence from peers and decides when to warn about it.
#[derive(Debug, Clone)]
struct CommWatch {
    last_heard: Option<Instant>,
    warn_at: Duration,
}

impl CommWatch {
    fn new(config: &SessionConfig) -> Self {
        Self {
            last_heard: None,
            warn_at: config.comm_warning_initial,
        }
    }

    fn heard(&mut self, now: Instant) {
        self.last_heard = Some(now);
    }

    /// Returns the threshold that was just crossed, if any.
    fn check(&mut self, now: Instant, config: &SessionConfig) -> Option<Duration> {
        let silent = now.saturating_duration_since(self.last_heard?);
        if silent >= self.warn_at {
            let crossed = self.warn_at;
            self.warn_at += config.comm_warning_step;
            return Some(crossed);
        }
        if silent < config.comm_reset_threshold {
            self.warn_at = config.comm_warning_initial;
        }
        None
    }
}

/// A [`LockstepSession`] runs one peer of a match: it exchanges action lists with the other
/// peers, executes every tick once all lists for it are in, and replays finished matches.
///
/// Call [`advance_tick`] at [`SessionConfig::tick_rate`], queue local intents with
/// [`queue_command`] or [`queue_action`], and drain [`events`] for messages to show.
///
/// [`advance_tick`]: Self::advance_tick
/// [`queue_command`]: Self::queue_command
/// [`queue_action`]: Self::queue_action
/// [`events`]: Self::events
pub struct LockstepSession<A: PeerAddress> {
    config: SessionConfig,
    state: SessionState,
    /// `None` for offline sessions.
    socket: Option<Box<dyn NonBlockingSocket<A>>>,
    local_id: ParticipantId,
    tick: Tick,
    ledger: IterationLedger,
    model: GameModel,
    replay: ReplayController,
    peers: Vec<A>,
    /// Participant IDs learned from the windows each peer sends.
    peer_ids: BTreeMap<A, ParticipantId>,
    /// Joiners whose welcome is queued but has not executed yet.
    pending_welcomes: BTreeSet<ParticipantId>,
    /// Actions queued locally and not yet entered into the ledger.
    local_actions: Vec<Action>,
    event_queue: VecDeque<ChessEvent<A>>,
    comm: CommWatch,
    join_host: Option<A>,
    last_hello: Option<Instant>,
    halted_by: Option<(Tick, ParticipantId)>,
    discovery_connected: bool,
    on_king_captured: Option<KingCapturedCallback>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<A: PeerAddress> std::fmt::Debug for LockstepSession<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockstepSession")
            .field("state", &self.state)
            .field("local_id", &self.local_id)
            .field("tick", &self.tick)
            .field("replay", &self.replay.state())
            .field("peers", &self.peers)
            .field("queued_actions", &self.local_actions.len())
            .field("pending_events", &self.event_queue.len())
            .finish_non_exhaustive()
    }
}

impl<A: PeerAddress> LockstepSession<A> {
    pub(crate) fn new(setup: SessionSetup<A>) -> Self {
        let SessionSetup {
            config,
            model,
            local_id,
            socket,
            peers,
            join_host,
            await_peers,
            initial_actions,
            on_king_captured,
            violation_observer,
        } = setup;

        let state = if join_host.is_some() {
            SessionState::Joining
        } else if await_peers && peers.is_empty() {
            SessionState::AwaitingPeers
        } else {
            SessionState::Running
        };

        let mut comm = CommWatch::new(&config);
        if !peers.is_empty() {
            comm.heard(Instant::now());
        }

        let mut session = Self {
            replay: ReplayController::new(config.replay_max_wait),
            config,
            state,
            socket,
            local_id,
            tick: Tick::ZERO,
            ledger: IterationLedger::new(),
            model,
            peers,
            peer_ids: BTreeMap::new(),
            pending_welcomes: BTreeSet::new(),
            local_actions: initial_actions,
            event_queue: VecDeque::new(),
            comm,
            join_host,
            last_hello: None,
            halted_by: None,
            discovery_connected: false,
            on_king_captured,
            violation_observer,
        };
        session.seed_local(Tick::ZERO);
        debug!(participant = %local_id, state = ?session.state, "session started");
        session
    }

    /// Runs one iteration: exchange windows with peers, enter queued local actions into the
    /// ledger `latency_window` ticks ahead, then execute the current tick if it is ready.
    ///
    /// A tick that is not ready yet is not an error; the call simply does nothing more and
    /// [`sync_health`] reports what is missing.
    ///
    /// # Errors
    /// - Returns [`ProtocolViolation`] once a participant has contradicted its own ledger
    ///   entry. The session is halted and every later call returns the same error.
    ///
    /// [`sync_health`]: Self::sync_health
    /// [`ProtocolViolation`]: ChessError::ProtocolViolation
    pub fn advance_tick(&mut self) -> Result<(), ChessError> {
        self.check_halted()?;
        match self.state {
            SessionState::Joining => {
                self.poll_join();
                return Ok(());
            },
            SessionState::AwaitingPeers => {
                self.communicate();
                return Ok(());
            },
            SessionState::Running | SessionState::Halted => {},
        }

        self.communicate();
        self.check_halted()?;

        if !self.replay.is_replaying() {
            self.submit_local_actions();
        }
        self.act();
        Ok(())
    }

    /// Parses a text command (`/verb args`, or plain text for chat) and queues it.
    ///
    /// `/endreplay` takes effect immediately and locally.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a known command has unreadable arguments, or if the
    ///   action is too large for one tick (see [`queue_action`]).
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    /// [`queue_action`]: Self::queue_action
    pub fn queue_command(&mut self, line: &str) -> Result<(), ChessError> {
        let action = Action::parse_command(line)?;
        self.queue_action(action)
    }

    /// Queues an action to be entered into the ledger at the next live iteration. It will
    /// execute `latency_window` ticks after that, on every peer.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if the encoded action exceeds
    ///   [`SessionConfig::tick_payload_budget`]. Peers could never receive a window
    ///   carrying it, and the match would stall on that tick.
    ///
    /// [`InvalidRequest`]: ChessError::InvalidRequest
    pub fn queue_action(&mut self, action: Action) -> Result<(), ChessError> {
        if matches!(action, Action::EndReplay) {
            self.end_replay();
            return Ok(());
        }
        let size = action.encoded_len();
        let budget = self.config.tick_payload_budget();
        if size > budget {
            return Err(ChessError::InvalidRequest {
                info: format!("/{} is {} bytes on the wire, at most {} fit in a tick", action.verb(), size, budget),
            });
        }
        trace!(verb = action.verb(), size, "local action queued");
        self.local_actions.push(action);
        Ok(())
    }

    /// Stops watching a replay: jumps straight to the live frontier and starts the next
    /// match there. Does nothing if no replay is running.
    pub fn end_replay(&mut self) {
        let Some(stop) = self.replay.stop() else {
            return;
        };
        debug!(from = %self.tick, to = %stop, "replay ended early");
        self.tick = stop;
        self.finish_replay_if_reached();
    }

    /// Adds a peer. Both sides must add each other before either has started ticking, as
    /// sessions from [`SessionBuilder::start_discovery_session`] do; peers that arrive
    /// later should join through [`SessionBuilder::join_session`].
    ///
    /// [`SessionBuilder::start_discovery_session`]: crate::SessionBuilder::start_discovery_session
    /// [`SessionBuilder::join_session`]: crate::SessionBuilder::join_session
    pub fn add_peer(&mut self, addr: A) {
        if self.peers.contains(&addr) {
            return;
        }
        debug!(%addr, "peer added");
        self.peers.push(addr.clone());
        self.comm.heard(Instant::now());
        if self.state == SessionState::AwaitingPeers {
            self.state = SessionState::Running;
        }
        self.push_event(ChessEvent::PeerJoined { addr });
    }

    /// Returns all events that happened since last queried for events. If the number of
    /// stored events exceeds an internal limit, the oldest events are discarded.
    pub fn events(&mut self) -> EventDrain<'_, A> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// Where the lockstep loop stands.
    #[must_use]
    pub fn sync_health(&self) -> SyncHealth {
        let tick = self.tick;
        match self.state {
            SessionState::Halted => SyncHealth::Halted { tick },
            SessionState::AwaitingPeers | SessionState::Joining => SyncHealth::WaitingForPeers {
                tick,
                missing: Vec::new(),
            },
            SessionState::Running => match self.replay.state() {
                ReplayState::Replaying { stop, .. } => SyncHealth::Replaying { tick, stop },
                ReplayState::Live if self.auto_advances(tick) || self.is_ready(tick) => {
                    SyncHealth::Running
                },
                ReplayState::Live => SyncHealth::WaitingForPeers {
                    tick,
                    missing: std::iter::once(self.local_id)
                        .chain(self.peer_ids.values().copied())
                        .filter(|p| !self.ledger.contains(tick, *p))
                        .collect(),
                },
            },
        }
    }

    /// Returns the current [`SessionState`] of a session.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.state
    }

    /// The next tick to execute.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// This peer's ID.
    #[must_use]
    pub fn local_participant(&self) -> ParticipantId {
        self.local_id
    }

    /// Peers in the order they were added.
    #[must_use]
    pub fn peers(&self) -> &[A] {
        &self.peers
    }

    /// Actions queued locally that have not entered the ledger yet.
    #[must_use]
    pub fn queued_actions(&self) -> &[Action] {
        &self.local_actions
    }

    /// Seats, names, score and board.
    #[must_use]
    pub fn model(&self) -> &GameModel {
        &self.model
    }

    /// The board and rule engine.
    #[must_use]
    pub fn game(&self) -> &Game {
        self.model.game()
    }

    /// Every action list recorded so far.
    #[must_use]
    pub fn ledger(&self) -> &IterationLedger {
        &self.ledger
    }

    /// Live or replaying.
    #[must_use]
    pub fn replay_state(&self) -> ReplayState {
        self.replay.state()
    }

    /// Checksum of the board; equal on every peer after the same tick.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        self.model.game().checksum()
    }

    /// The timing configuration this session runs with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns a reference to the violation observer, if one was configured.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }

    fn check_halted(&self) -> Result<(), ChessError> {
        match self.halted_by {
            Some((tick, participant)) => Err(ChessError::ProtocolViolation { tick, participant }),
            None => Ok(()),
        }
    }

    fn latency(&self) -> u32 {
        self.config.latency_window
    }

    /// Records empty local lists for `[from, from + latency)`; nothing can be submitted
    /// there any more.
    fn seed_local(&mut self, from: Tick) {
        for offset in 0..self.latency() {
            let _ = self.ledger.insert(from + offset, self.local_id, Vec::new());
        }
    }

    fn auto_advances(&self, tick: Tick) -> bool {
        tick.as_u32() < self.latency()
    }

    /// Self plus one entry per peer.
    fn is_ready(&self, tick: Tick) -> bool {
        self.ledger.participants_at(tick) > self.peers.len()
    }

    /// Enters as many queued actions as fit in one tick; the rest wait for the next.
    fn submit_local_actions(&mut self) {
        let at = self.tick + self.latency();
        if self.ledger.contains(at, self.local_id) {
            return;
        }
        let budget = self.config.tick_payload_budget();
        let mut used = 0;
        let fits = self
            .local_actions
            .iter()
            .take_while(|action| {
                used += action.encoded_len();
                used <= budget
            })
            .count()
            .max(usize::from(!self.local_actions.is_empty()));
        let actions: Vec<Action> = self.local_actions.drain(..fits).collect();
        if !actions.is_empty() {
            trace!(tick = %at, count = actions.len(), "submitting local actions");
        }
        let _ = self.ledger.insert(at, self.local_id, actions);
    }

    fn communicate(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        if !self.peers.is_empty() {
            let centre = self.replay.stop().unwrap_or(self.tick);
            let window = self.ledger.window(
                self.local_id,
                centre.saturating_sub(self.config.latency_window),
                centre + self.config.latency_window,
            );
            let packet = Packet::window(self.local_id, window);
            for peer in &self.peers {
                socket.send_to(&packet, peer);
            }
        }

        let received = socket.receive_all_packets();
        let now = Instant::now();
        for (addr, packet) in received {
            self.comm.heard(now);
            match packet.body {
                PacketBody::Hello { participant } => self.handle_hello(addr, participant),
                PacketBody::Window { participant, ticks } => {
                    self.merge_window(&addr, participant, ticks);
                    if self.halted_by.is_some() {
                        return;
                    }
                },
            }
        }

        if self.peers.is_empty() {
            return;
        }
        if let Some(crossed) = self.comm.check(now, &self.config) {
            let silent_secs = crossed.as_secs();
            debug!(silent_secs, "no communication from peers");
            self.message(format!("No communication for {} seconds", silent_secs));
            self.push_event(ChessEvent::NoCommunication { silent_secs });
        }
    }

    /// A lone host welcomes too; it has been ticking on its own all along.
    fn handle_hello(&mut self, addr: A, participant: ParticipantId) {
        if self.state != SessionState::Running
            || participant == self.local_id
            || self.peers.contains(&addr)
            || !self.pending_welcomes.insert(participant)
        {
            return;
        }
        debug!(%addr, %participant, "welcoming joining peer");
        let roster = self.peers.iter().map(ToString::to_string).collect();
        self.local_actions.push(Action::Welcome {
            peer: addr.to_string(),
            participant,
            num_boards: self.model.game().num_boards(),
            roster,
        });
    }

    fn merge_window(&mut self, addr: &A, participant: ParticipantId, ticks: Vec<(Tick, Vec<Action>)>) {
        if !self.peers.contains(addr) {
            trace!(%addr, "dropping window from unknown address");
            return;
        }
        if self.peer_ids.insert(addr.clone(), participant).is_none() {
            debug!(%addr, %participant, "learned peer identity");
        }
        for (tick, actions) in ticks {
            if self.ledger.insert(tick, participant, actions) == MergeOutcome::Conflict {
                self.halt(tick, participant);
                return;
            }
        }
    }

    fn halt(&mut self, tick: Tick, participant: ParticipantId) {
        report_violation_to!(
            &self.violation_observer,
            tick,
            ViolationSeverity::Critical,
            ViolationKind::Ledger,
            "participant {} announced conflicting actions for tick {}",
            participant,
            tick
        );
        self.state = SessionState::Halted;
        self.halted_by = Some((tick, participant));
        self.push_event(ChessEvent::DesyncDetected { tick, participant });
    }

    fn poll_join(&mut self) {
        let (Some(host), Some(socket)) = (self.join_host.clone(), self.socket.as_mut()) else {
            return;
        };
        let now = Instant::now();
        let hello_due = self.last_hello.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.config.hello_interval
        });
        if hello_due {
            trace!(%host, "sending hello");
            socket.send_to(&Packet::hello(self.local_id), &host);
            self.last_hello = Some(now);
        }

        let received = socket.receive_all_packets();
        for (addr, packet) in received {
            let PacketBody::Window { participant, ticks } = packet.body else {
                continue;
            };
            let welcome = ticks.iter().find_map(|(tick, actions)| {
                actions.iter().find_map(|action| match action {
                    Action::Welcome {
                        participant: joiner,
                        roster,
                        ..
                    } if *joiner == self.local_id => Some((*tick, roster.clone())),
                    _ => None,
                })
            });
            if let Some((tick, roster)) = welcome {
                self.complete_join(addr, participant, ticks, tick, &roster);
                return;
            }
        }
    }

    /// Fast-forwards to the tick of our welcome and starts exchanging ticks from there.
    fn complete_join(
        &mut self,
        host: A,
        host_id: ParticipantId,
        ticks: Vec<(Tick, Vec<Action>)>,
        tick: Tick,
        roster: &[String],
    ) {
        debug!(%host, %tick, "welcomed into running match");
        self.ledger.clear();
        for (at, actions) in ticks {
            let _ = self.ledger.insert(at, host_id, actions);
        }
        self.tick = tick;
        self.seed_local(tick);
        self.join_host = None;
        self.state = SessionState::Running;
        self.peer_ids.insert(host.clone(), host_id);
        self.add_peer(host.clone());
        for entry in roster {
            match entry.parse::<A>() {
                Ok(peer) => self.add_peer(peer),
                Err(_) => report_violation_to!(
                    &self.violation_observer,
                    tick,
                    ViolationSeverity::Warning,
                    ViolationKind::NetworkProtocol,
                    "unreadable roster address {}",
                    entry
                ),
            }
        }
        self.push_event(ChessEvent::Joined { host, tick });
    }

    fn act(&mut self) {
        let tick = match self.replay.state() {
            ReplayState::Replaying { stop, .. } => {
                if self.ledger.has_actions(self.tick) {
                    self.replay.note_busy_tick();
                } else if self.tick.next() < stop {
                    self.tick = self.tick.next();
                    if self.replay.note_empty_tick() {
                        while !self.ledger.has_actions(self.tick) && self.tick.next() < stop {
                            self.tick = self.tick.next();
                        }
                    }
                }
                self.tick
            },
            ReplayState::Live => {
                if self.auto_advances(self.tick) {
                    self.tick = self.tick.next();
                    return;
                }
                if !self.is_ready(self.tick) {
                    trace!(tick = %self.tick, "waiting for peers");
                    return;
                }
                self.tick
            },
        };

        self.execute_tick(tick);
        self.tick = tick.next();
        self.finish_replay_if_reached();

        let requested = self.replay.is_requested();
        match self.replay.begin_if_requested(self.tick) {
            Some(from) => {
                let to = self.tick;
                self.tick = from;
                self.model.reinit_board();
                self.model.set_replaying(true);
                self.message("Replaying the match");
                self.push_event(ChessEvent::ReplayStarted { from, to });
            },
            None if requested && !self.replay.is_replaying() => {
                report_violation_to!(
                    &self.violation_observer,
                    tick,
                    ViolationSeverity::Warning,
                    ViolationKind::Replay,
                    "replay requested at tick {} but the match started at {}",
                    tick,
                    self.replay.last_start()
                );
                self.message("Nothing to replay");
            },
            None => {},
        }
    }

    fn finish_replay_if_reached(&mut self) {
        if !self.replay.finish_if_reached(self.tick) {
            return;
        }
        self.model.set_replaying(false);
        self.model.reinit_board();
        self.message("Replay finished");
        self.push_event(ChessEvent::ReplayFinished { tick: self.tick });
    }

    fn execute_tick(&mut self, tick: Tick) {
        self.model.set_tick(tick);
        let entries: Vec<(ParticipantId, Action)> = self
            .ledger
            .actions_at(tick)
            .map(|(participant, action)| (participant, action.clone()))
            .collect();
        for (participant, action) in &entries {
            self.execute_action(tick, *participant, action);
        }
    }

    fn execute_action(&mut self, tick: Tick, participant: ParticipantId, action: &Action) {
        let nick = self.model.nick(participant);
        let result = match action {
            Action::Welcome {
                peer,
                participant: joiner,
                num_boards,
                ..
            } => self.execute_welcome(tick, *joiner, peer, *num_boards),
            Action::EndReplay => Ok(()),
            _ => self.model.apply(participant, action),
        };
        let mut spoke = self.forward_notices();
        if let Err(err) = result {
            report_violation_to!(
                &self.violation_observer,
                tick,
                ViolationSeverity::Warning,
                ViolationKind::Rules,
                "participant {}: {}",
                participant,
                err
            );
            self.message(err.to_string());
            spoke = true;
        }
        if !spoke && !action.is_quiet() {
            self.message(format!("{} did {}", nick, action.verb().to_uppercase()));
        }
    }

    /// A welcome starts a fresh match on every peer, so the joiner needs no history.
    /// Seats are cleared everywhere; existing peers take theirs again through the ledger,
    /// along with their names, so the joiner learns both.
    fn execute_welcome(
        &mut self,
        tick: Tick,
        joiner: ParticipantId,
        peer: &str,
        num_boards: u8,
    ) -> Result<(), ChessError> {
        self.pending_welcomes.remove(&joiner);
        let seat = self.model.player_of(self.local_id);
        self.model.start_welcomed_match(tick.next(), num_boards)?;
        if joiner == self.local_id || self.replay.is_replaying() {
            return Ok(());
        }
        let addr = peer
            .parse::<A>()
            .ok()
            .ok_or_else(|| ChessError::invalid_action("welcome", format!("unreadable address {}", peer)))?;
        self.add_peer(addr);
        if let Some(name) = self.model.nickname(self.local_id) {
            let name = name.to_owned();
            self.local_actions.push(Action::Nick { name });
        }
        if let Some(player) = seat.filter(|p| p.index() < self.model.game().num_players()) {
            self.local_actions.push(Action::Become { player: Some(player) });
        }
        Ok(())
    }

    /// Turns the model's notices into events. Returns whether any message was among them.
    fn forward_notices(&mut self) -> bool {
        let notices: Vec<Notice> = self.model.drain_notices().collect();
        let mut spoke = false;
        for notice in notices {
            match notice {
                Notice::Message(text) => {
                    spoke = true;
                    self.message(text);
                },
                Notice::KingCaptured(player) => {
                    if !self.replay.is_replaying() {
                        if let Some(callback) = self.on_king_captured.as_mut() {
                            callback(player);
                        }
                    }
                    self.push_event(ChessEvent::KingCaptured { player });
                },
                Notice::MatchStarted { tick, num_boards } => {
                    if !self.replay.is_replaying() {
                        self.replay.set_last_start(tick);
                    }
                    self.push_event(ChessEvent::MatchStarted { tick, num_boards });
                },
                Notice::ReplayRequested => {
                    if !self.replay.request() {
                        trace!("replay already running");
                    }
                },
            }
        }
        spoke
    }

    fn message(&mut self, text: impl Into<String>) {
        self.push_event(ChessEvent::Message { text: text.into() });
    }

    fn push_event(&mut self, event: ChessEvent<A>) {
        if self.event_queue.len() >= MAX_EVENT_QUEUE_SIZE {
            self.event_queue.pop_front();
        }
        self.event_queue.push_back(event);
    }
}

impl LockstepSession<SocketAddr> {
    /// Applies whatever the discovery worker has found since the last call: shows our
    /// match address, adds peers, and reports failed lookups.
    pub fn poll_discovery(&mut self, worker: &DiscoveryWorker) {
        for event in worker.poll() {
            match event {
                DiscoveryEvent::Registered { address } => {
                    self.message("Your address is:");
                    self.message(address.to_uppercase());
                    self.message("Type the address of a friend to play with them");
                },
                DiscoveryEvent::Peers(found) => {
                    for peer in found {
                        if self.peers.contains(&peer) {
                            continue;
                        }
                        self.add_peer(peer);
                        if !self.discovery_connected {
                            self.discovery_connected = true;
                            self.message("Connection successful!");
                            self.message("THE GAME BEGINS!");
                        }
                    }
                },
                DiscoveryEvent::NoSuchGame { address } => {
                    self.message(format!("No such game: {}", address));
                },
                DiscoveryEvent::Failed { context } => {
                    report_violation_to!(
                        &self.violation_observer,
                        self.tick,
                        ViolationSeverity::Warning,
                        ViolationKind::Discovery,
                        "{}",
                        context
                    );
                },
            }
        }
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::telemetry::CollectingObserver;
    use crate::{RuleConfig, SessionBuilder};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A socket whose inbox the test fills by hand.
    #[derive(Default, Clone)]
    struct ScriptedSocket {
        inbox: Rc<RefCell<Vec<(u8, Packet)>>>,
        sent: Rc<RefCell<Vec<(u8, Packet)>>>,
    }

    impl NonBlockingSocket<u8> for ScriptedSocket {
        fn send_to(&mut self, packet: &Packet, addr: &u8) {
            self.sent.borrow_mut().push((*addr, packet.clone()));
        }

        fn receive_all_packets(&mut self) -> Vec<(u8, Packet)> {
            std::mem::take(&mut *self.inbox.borrow_mut())
        }
    }

    fn offline() -> LockstepSession<u8> {
        SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .start_offline_session()
            .expect("offline session")
    }

    fn messages(session: &mut LockstepSession<u8>) -> Vec<String> {
        session
            .events()
            .filter_map(|e| match e {
                ChessEvent::Message { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn run(session: &mut LockstepSession<u8>, iterations: usize) {
        for _ in 0..iterations {
            session.advance_tick().unwrap();
        }
    }

    #[test]
    fn offline_session_executes_after_latency_window() {
        let mut session = offline();
        session.queue_command("/nick bob").unwrap();
        run(&mut session, 5);
        assert!(messages(&mut session).is_empty());
        run(&mut session, 1);
        assert_eq!(messages(&mut session), vec!["Spectator renames to bob".to_owned()]);
        assert_eq!(session.tick(), Tick::new(6));
    }

    #[test]
    fn silent_non_quiet_action_gets_default_message() {
        let mut session = offline();
        session.queue_command("/nick amy").unwrap();
        run(&mut session, 1);
        session.queue_command("/reset").unwrap();
        run(&mut session, 6);
        let log = messages(&mut session);
        assert!(log.contains(&"amy did RESET".to_owned()), "{:?}", log);
    }

    #[test]
    fn failing_action_is_reported_and_tick_continues() {
        let mut session = offline();
        session.queue_command("/become 7").unwrap();
        run(&mut session, 6);
        assert_eq!(
            messages(&mut session),
            vec!["action become failed: no such player 7".to_owned()]
        );
        assert_eq!(session.tick(), Tick::new(6));
    }

    #[test]
    fn refused_actions_reach_the_observer() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::<u8>::new()
            .with_participant_id(ParticipantId::new(1))
            .with_violation_observer(observer.clone())
            .start_offline_session()
            .unwrap();
        session.queue_command("/move 4,4 4,5").unwrap();
        run(&mut session, 6);
        let violations = observer.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Rules);
        assert_eq!(violations[0].tick, Some(Tick::new(5)));
    }

    #[test]
    fn chat_too_long_for_a_tick_is_refused() {
        let mut session = offline();
        let budget = session.config().tick_payload_budget();
        let result = session.queue_command(&"x".repeat(budget));
        assert!(matches!(result, Err(ChessError::InvalidRequest { .. })));
        assert!(session.queued_actions().is_empty());
        session.queue_command(&"x".repeat(budget - 64)).unwrap();
        assert_eq!(session.queued_actions().len(), 1);
    }

    #[test]
    fn queued_actions_spread_over_ticks_when_large() {
        let mut session = offline();
        let line = "y".repeat(session.config().tick_payload_budget() * 2 / 3);
        for _ in 0..3 {
            session.queue_command(&line).unwrap();
        }
        session.queue_command("/nick amy").unwrap();
        run(&mut session, 3);
        let per_tick: Vec<usize> = (5..8)
            .map(|t| session.ledger().actions_at(Tick::new(t)).count())
            .collect();
        assert_eq!(per_tick, vec![1, 1, 2]);
        assert!(session.queued_actions().is_empty());
    }

    #[test]
    fn replay_of_a_match_without_ticks_is_refused() {
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::<u8>::new()
            .with_participant_id(ParticipantId::new(1))
            .with_violation_observer(observer.clone())
            .start_offline_session()
            .unwrap();
        session.queue_command("/reset").unwrap();
        session.queue_command("/replay").unwrap();
        run(&mut session, 1);
        session.queue_command("/move 4,1 4,3").unwrap();
        run(&mut session, 12);

        assert_eq!(session.replay_state(), ReplayState::Live);
        assert!(session.game().board().is_occupied(crate::Coord::new(4, 3)));
        assert!(!session.game().board().is_occupied(crate::Coord::new(4, 1)));
        let events: Vec<_> = session.events().collect();
        assert!(!events.iter().any(|e| matches!(e, ChessEvent::ReplayStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChessEvent::Message { text } if text == "Nothing to replay")));
        assert!(observer.has_violation(ViolationKind::Replay));
    }

    #[test]
    fn replay_rewinds_and_leaves_ledger_alone() {
        let mut session = offline();
        session.queue_command("/nick amy").unwrap();
        run(&mut session, 6);
        session.queue_command("/replay").unwrap();
        run(&mut session, 6);
        assert!(session.replay_state() != ReplayState::Live);
        let ledger_before = session.ledger().clone();
        let _ = messages(&mut session);

        for _ in 0..100 {
            if session.replay_state() == ReplayState::Live {
                break;
            }
            session.advance_tick().unwrap();
        }
        assert_eq!(session.replay_state(), ReplayState::Live);
        assert_eq!(session.ledger(), &ledger_before);
        // Nicknames persist, so the replayed rename reads "amy renames to amy".
        assert!(messages(&mut session).iter().any(|m| m.ends_with("renames to amy")));
        assert_eq!(session.checksum(), Game::new(RuleConfig::standard()).checksum());
    }

    #[test]
    fn end_replay_jumps_to_frontier() {
        let mut session = offline();
        session.queue_command("/replay").unwrap();
        run(&mut session, 6);
        let Some(stop) = session.replay.stop() else {
            panic!("replay should be running");
        };
        session.queue_command("/endreplay").unwrap();
        assert_eq!(session.replay_state(), ReplayState::Live);
        assert_eq!(session.tick(), stop);
        assert!(session
            .events()
            .any(|e| matches!(e, ChessEvent::ReplayFinished { .. })));
    }

    #[test]
    fn tick_waits_for_silent_peer() {
        let socket = ScriptedSocket::default();
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .start_p2p_session(socket.clone())
            .unwrap();
        run(&mut session, 20);
        assert_eq!(session.tick(), Tick::new(5));
        assert!(matches!(
            session.sync_health(),
            SyncHealth::WaitingForPeers { tick, .. } if tick == Tick::new(5)
        ));
        assert!(!socket.sent.borrow().is_empty());
    }

    #[test]
    fn peer_entry_unblocks_tick() {
        let socket = ScriptedSocket::default();
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .start_p2p_session(socket.clone())
            .unwrap();
        run(&mut session, 6);
        assert_eq!(session.tick(), Tick::new(5));
        socket.inbox.borrow_mut().push((
            9,
            Packet::window(ParticipantId::new(2), vec![(Tick::new(5), vec![Action::Help])]),
        ));
        run(&mut session, 1);
        assert_eq!(session.tick(), Tick::new(6));
        assert_eq!(session.sync_health(), SyncHealth::WaitingForPeers {
            tick: Tick::new(6),
            missing: vec![ParticipantId::new(2)],
        });
    }

    #[test]
    fn conflicting_entry_halts_session() {
        let socket = ScriptedSocket::default();
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .with_violation_observer(observer.clone())
            .start_p2p_session(socket.clone())
            .unwrap();
        let peer = ParticipantId::new(2);
        socket.inbox.borrow_mut().extend([
            (9, Packet::window(peer, vec![(Tick::new(7), vec![Action::Help])])),
            (9, Packet::window(peer, vec![(Tick::new(7), vec![Action::Credits])])),
        ]);
        let err = session.advance_tick().unwrap_err();
        assert_eq!(err, ChessError::ProtocolViolation {
            tick: Tick::new(7),
            participant: peer,
        });
        assert_eq!(session.current_state(), SessionState::Halted);
        assert!(session.advance_tick().is_err());
        assert!(observer.has_violation(ViolationKind::Ledger));
        assert_eq!(session.ledger().get(Tick::new(7), peer), Some(&[Action::Help][..]));
        assert!(session
            .events()
            .any(|e| matches!(e, ChessEvent::DesyncDetected { .. })));
    }

    #[test]
    fn windows_from_strangers_are_ignored() {
        let socket = ScriptedSocket::default();
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .start_p2p_session(socket.clone())
            .unwrap();
        socket.inbox.borrow_mut().push((
            4,
            Packet::window(ParticipantId::new(3), vec![(Tick::new(2), vec![Action::Help])]),
        ));
        run(&mut session, 1);
        assert!(!session.ledger().contains(Tick::new(2), ParticipantId::new(3)));
    }

    #[test]
    fn hello_queues_one_welcome() {
        let socket = ScriptedSocket::default();
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .start_p2p_session(socket.clone())
            .unwrap();
        let joiner = ParticipantId::new(5);
        socket
            .inbox
            .borrow_mut()
            .extend([(4, Packet::hello(joiner)), (4, Packet::hello(joiner))]);
        session.communicate();
        assert_eq!(session.queued_actions(), &[Action::Welcome {
            peer: "4".to_owned(),
            participant: joiner,
            num_boards: 1,
            roster: vec!["9".to_owned()],
        }]);
    }

    #[test]
    fn awaiting_session_starts_when_peer_added() {
        let mut session = SessionBuilder::new()
            .with_participant_id(ParticipantId::new(1))
            .start_discovery_session(ScriptedSocket::default())
            .unwrap();
        assert_eq!(session.current_state(), SessionState::AwaitingPeers);
        run(&mut session, 3);
        assert_eq!(session.tick(), Tick::ZERO);
        session.add_peer(3);
        assert_eq!(session.current_state(), SessionState::Running);
        assert!(session
            .events()
            .any(|e| e == ChessEvent::PeerJoined { addr: 3 }));
    }

    #[test]
    fn silence_triggers_warning() {
        let config = SessionConfig {
            comm_warning_initial: Duration::from_millis(20),
            comm_warning_step: Duration::from_millis(10),
            comm_reset_threshold: Duration::from_millis(5),
            ..SessionConfig::default()
        };
        let mut session = SessionBuilder::new()
            .with_session_config(config)
            .with_participant_id(ParticipantId::new(1))
            .add_peer(9u8)
            .start_p2p_session(ScriptedSocket::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        run(&mut session, 1);
        let events: Vec<_> = session.events().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, ChessEvent::NoCommunication { .. })));
        assert!(events.iter().any(
            |e| matches!(e, ChessEvent::Message { text } if text.starts_with("No communication"))
        ));
    }

    #[test]
    fn comm_watch_resets_after_traffic() {
        let config = SessionConfig::default();
        let mut watch = CommWatch::new(&config);
        let start = Instant::now();
        watch.heard(start);
        assert_eq!(
            watch.check(start + Duration::from_secs(10), &config),
            Some(Duration::from_secs(10))
        );
        assert_eq!(watch.check(start + Duration::from_secs(12), &config), None);
        assert_eq!(
            watch.check(start + Duration::from_secs(15), &config),
            Some(Duration::from_secs(15))
        );
        let later = start + Duration::from_secs(20);
        watch.heard(later);
        assert_eq!(watch.check(later + Duration::from_secs(1), &config), None);
        assert_eq!(watch.warn_at, config.comm_warning_initial);
    }
}
