//! # Lockstep Chess
//!
//! A deterministic lockstep engine for a real-time chess variant played by two to four
//! players over peer-to-peer UDP, with no authoritative server.
//!
//! Every peer runs its own copy of the simulation. Local intents are scheduled a fixed
//! number of ticks in the future, every peer broadcasts its own schedule for a sliding
//! window of ticks, and a tick only executes once every participant's action list for it
//! has arrived. Actions for a ready tick run in participant-ID order through the rule
//! engine in [`rules`], so all peers end every tick with the same board.
//!
//! A finished match can be replayed from the action ledger before live play resumes.
//!
//! ```no_run
//! use lockstep_chess::{SessionBuilder, UdpNonBlockingSocket};
//!
//! # fn main() -> Result<(), lockstep_chess::ChessError> {
//! let socket = UdpNonBlockingSocket::bind_to_port(7000)
//!     .map_err(|e| lockstep_chess::ChessError::SocketError { context: e.to_string() })?;
//! let mut session = SessionBuilder::new()
//!     .add_peer("127.0.0.1:7001".parse().map_err(|_| lockstep_chess::ChessError::InvalidRequest {
//!         info: "bad address".to_owned(),
//!     })?)
//!     .start_p2p_session(socket)?;
//!
//! session.queue_command("/nick alice")?;
//! loop {
//!     session.advance_tick()?;
//!     for event in session.events() {
//!         tracing::info!(?event, "session event");
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::{fmt::Debug, fmt::Display, hash::Hash, str::FromStr};

pub use action::{Action, Param, WireAction};
pub use error::ChessError;
pub use ledger::{IterationLedger, MergeOutcome};
pub use model::{GameModel, KingCapturePolicy};
pub use network::chaos_socket::{ChaosConfig, ChaosSocket, ChaosStats};
pub use network::discovery::{
    DiscoveryConfig, DiscoveryEvent, DiscoveryWorker, HttpDirectory, PeerDirectory,
};
pub use network::messages::{Packet, PacketBody};
pub use network::udp_socket::UdpNonBlockingSocket;
pub use rules::{Board, Coord, Game, MoveOutcome, MoveReport, Piece, PieceKind, Rejection, RuleConfig};
pub use sessions::builder::SessionBuilder;
pub use sessions::config::SessionConfig;
pub use sessions::event_drain::EventDrain;
pub use sessions::lockstep_session::LockstepSession;
pub use sessions::replay::{ReplayController, ReplayState};
pub use sessions::sync_health::SyncHealth;

pub mod action;
#[doc(hidden)]
pub mod error;
pub mod hash;
pub mod ledger;
pub mod model;
pub mod rng;
pub mod rules;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    pub mod builder;
    pub mod config;
    pub mod event_drain;
    pub mod lockstep_session;
    pub mod replay;
    pub mod sync_health;
}
/// Everything between a session and the wire.
pub mod network {
    /// Socket wrapper that drops, delays, duplicates and shuffles packets.
    pub mod chaos_socket;
    /// Binary codec for network packet serialization.
    ///
    /// Provides centralized encoding and decoding of packets using bincode.
    pub mod codec;
    /// Matchmaking lookup client and its background thread.
    pub mod discovery;
    /// Packets: hellos and action windows.
    pub mod messages;
    /// Non-blocking UDP socket.
    pub mod udp_socket;
}

/// A discrete simulation step; the unit of lockstep ordering.
///
/// The tick counter only ever moves forward during live play. Replay rewinds it to the
/// start of the match and plays it forward again, but never past the live frontier.
///
/// # Examples
///
/// ```
/// use lockstep_chess::Tick;
///
/// let tick = Tick::new(3);
/// assert_eq!((tick + 5).as_u32(), 8);
/// assert_eq!(tick.saturating_sub(5), Tick::ZERO);
/// assert!(tick + 1 > tick);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Tick(u32);

impl Tick {
    /// The first tick of every session.
    pub const ZERO: Tick = Tick(0);

    /// Creates a new `Tick` from a `u32` value.
    #[inline]
    #[must_use]
    pub const fn new(tick: u32) -> Self {
        Tick(tick)
    }

    /// Returns the underlying `u32` value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Subtracts `rhs` ticks, clamping at [`Tick::ZERO`].
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: u32) -> Tick {
        Tick(self.0.saturating_sub(rhs))
    }

    /// Number of ticks elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[inline]
    #[must_use]
    pub const fn ticks_since(self, earlier: Tick) -> u32 {
        self.0.saturating_sub(earlier.0)
    }

    /// The tick immediately after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Tick {
        Tick(self.0 + 1)
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<u32> for Tick {
    type Output = Tick;

    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Tick(self.0 + rhs)
    }
}

impl std::ops::AddAssign<u32> for Tick {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl From<u32> for Tick {
    #[inline]
    fn from(value: u32) -> Self {
        Tick(value)
    }
}

impl From<Tick> for u32 {
    #[inline]
    fn from(tick: Tick) -> Self {
        tick.0
    }
}

/// A random 64-bit identity for one running peer.
///
/// Participant IDs order action execution inside a tick, so every peer must see the same
/// IDs. They are drawn at random with no collision handling; two peers drawing the same
/// value will surface as a protocol violation.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Creates a participant ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        ParticipantId(id)
    }

    /// Draws a fresh ID from the thread-local generator.
    #[must_use]
    pub fn random() -> Self {
        ParticipantId(rng::random_u64())
    }

    /// Returns the underlying `u64` value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A seat at the table. Players `0` and `1` sit on the first board, `2` and `3` on the
/// second; even players are White, odd players are Black.
///
/// ```
/// use lockstep_chess::Player;
///
/// assert_eq!(Player::new(2).side(), 0);
/// assert_eq!(Player::new(3).board(), 1);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Player(u8);

impl Player {
    /// Creates a player from a seat index.
    #[inline]
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Player(index)
    }

    /// The seat index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// `0` for White, `1` for Black.
    #[inline]
    #[must_use]
    pub const fn side(self) -> u8 {
        self.0 % 2
    }

    /// The board this seat plays on.
    #[inline]
    #[must_use]
    pub const fn board(self) -> u8 {
        self.0 / 2
    }
}

impl Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounds for the address type that identifies remote peers.
///
/// Addresses travel inside `welcome` actions as text, so they must round-trip through
/// [`Display`] and [`FromStr`].
pub trait PeerAddress: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + Display + FromStr + 'static {}

impl<T> PeerAddress for T where
    T: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + Display + FromStr + 'static
{
}

/// A session is always in one of these states. You can query the current state of a session via [`current_state`].
///
/// [`current_state`]: LockstepSession#method.current_state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Started for discovery and no peer found yet; ticks do not advance until one is added.
    AwaitingPeers,
    /// A `hello` has been sent and the session waits to see its own `welcome`.
    Joining,
    /// Ticks advance as soon as every participant's entry has arrived.
    Running,
    /// A participant contradicted its own ledger entry. No further ticks run.
    Halted,
}

/// Notifications that you can receive from the session. Handling them is up to the user.
///
/// This enum is marked `#[non_exhaustive]`; always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChessEvent<A> {
    /// A line for the message log: chat, move reports, action failures.
    Message {
        /// The text to show.
        text: String,
    },
    /// A King died and its player's army was removed.
    KingCaptured {
        /// The player whose King was taken.
        player: Player,
    },
    /// A new match began with a fresh board.
    MatchStarted {
        /// First tick of the match.
        tick: Tick,
        /// Number of boards in play.
        num_boards: u8,
    },
    /// The session began replaying the finished match.
    ReplayStarted {
        /// First replayed tick.
        from: Tick,
        /// Live frontier at which replay ends.
        to: Tick,
    },
    /// Replay reached the live frontier and live play resumed.
    ReplayFinished {
        /// Tick at which live play resumed.
        tick: Tick,
    },
    /// A peer was added to the session.
    PeerJoined {
        /// The address of the endpoint.
        addr: A,
    },
    /// This session was welcomed into a running match and fast-forwarded to its tick.
    Joined {
        /// The peer that welcomed us.
        host: A,
        /// The tick we resumed at.
        tick: Tick,
    },
    /// Nothing has been received from any peer for a while. Play is stalled, not aborted.
    NoCommunication {
        /// Whole seconds since the last packet.
        silent_secs: u64,
    },
    /// A participant contradicted its own ledger entry for a tick.
    DesyncDetected {
        /// The tick whose entry disagreed.
        tick: Tick,
        /// The participant that sent the conflicting list.
        participant: ParticipantId,
    },
}

/// This [`NonBlockingSocket`] trait is used when you want to use this crate with your own socket.
/// Packets should be sent in an UDP-like fashion, unordered and unreliable; the lockstep
/// window re-sends every entry until it slides past it.
pub trait NonBlockingSocket<A>
where
    A: Clone + PartialEq + Eq + Hash,
{
    /// Takes a [`Packet`] and sends it to the given address.
    fn send_to(&mut self, packet: &Packet, addr: &A);

    /// This method should return all packets received since the last time this method was called.
    /// The pairs `(A, Packet)` indicate from which address each packet was received.
    fn receive_all_packets(&mut self) -> Vec<(A, Packet)>;
}

// ###################
// # UNIT TESTS      #
// ###################

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
    fn tick_saturating_sub_clamps_at_zero() {
        assert_eq!(Tick::new(3).saturating_sub(5), Tick::ZERO);
        assert_eq!(Tick::new(10).saturating_sub(5), Tick::new(5));
    }

    #[test]
    fn tick_ticks_since_never_underflows() {
        assert_eq!(Tick::new(10).ticks_since(Tick::new(4)), 6);
        assert_eq!(Tick::new(4).ticks_since(Tick::new(10)), 0);
    }

    #[test]
    fn participant_ids_order_numerically() {
        let mut ids = vec![ParticipantId::new(9), ParticipantId::new(1), ParticipantId::new(5)];
        ids.sort();
        assert_eq!(
            ids,
            vec![ParticipantId::new(1), ParticipantId::new(5), ParticipantId::new(9)]
        );
    }

    #[test]
    fn participant_display_is_fixed_width_hex() {
        assert_eq!(ParticipantId::new(255).to_string(), "00000000000000ff");
    }

    #[test]
    fn player_side_and_board() {
        assert_eq!(Player::new(0).side(), 0);
        assert_eq!(Player::new(1).side(), 1);
        assert_eq!(Player::new(2).board(), 1);
        assert_eq!(Player::new(3).side(), 1);
    }
}
