use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::network::codec::{self, CodecOperation, CodecResult};
use crate::{ParticipantId, Tick};

/// Every packet starts with this; anything else on the port is not ours.
pub const PACKET_MAGIC: u16 = 0xC4E5;

/// Largest encoded packet a socket must be able to receive. Sessions size their windows
/// to stay below it.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Fixed header preceding every packet body.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Must equal [`PACKET_MAGIC`].
    pub magic: u16,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self { magic: PACKET_MAGIC }
    }
}

/// What a packet carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketBody {
    /// A joining peer announcing itself. Repeated until it is welcomed.
    Hello {
        /// The joiner's ID.
        participant: ParticipantId,
    },
    /// The sender's own action lists for a run of ticks around its current tick.
    Window {
        /// The sender's ID.
        participant: ParticipantId,
        /// `(tick, actions)` pairs in ascending tick order.
        ticks: Vec<(Tick, Vec<Action>)>,
    },
}

/// A packet that a [`NonBlockingSocket`] sends and receives. Socket implementations
/// decode datagrams into this type with [`Packet::from_bytes`].
///
/// [`NonBlockingSocket`]: crate::NonBlockingSocket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Magic number.
    pub header: PacketHeader,
    /// Payload.
    pub body: PacketBody,
}

impl Packet {
    /// A hello from `participant`.
    #[must_use]
    pub fn hello(participant: ParticipantId) -> Self {
        Self {
            header: PacketHeader::default(),
            body: PacketBody::Hello { participant },
        }
    }

    /// A window of `participant`'s action lists.
    #[must_use]
    pub fn window(participant: ParticipantId, ticks: Vec<(Tick, Vec<Action>)>) -> Self {
        Self {
            header: PacketHeader::default(),
            body: PacketBody::Window { participant, ticks },
        }
    }

    /// The sender's ID.
    #[must_use]
    pub const fn participant(&self) -> ParticipantId {
        match &self.body {
            PacketBody::Hello { participant } | PacketBody::Window { participant, .. } => *participant,
        }
    }

    /// Whether the header carries our magic number.
    #[must_use]
    pub const fn has_valid_magic(&self) -> bool {
        self.header.magic == PACKET_MAGIC
    }

    /// Encodes the packet for sending.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        codec::encode(self).map_err(|e| e.during(CodecOperation::EncodePacket))
    }

    /// Decodes a received datagram.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        codec::decode_value(bytes).map_err(|e| e.during(CodecOperation::DecodePacket))
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
    use crate::action::{Param, WireAction};

    #[test]
    fn new_packets_carry_magic() {
        let packet = Packet::hello(ParticipantId::new(3));
        assert!(packet.has_valid_magic());
        assert_eq!(packet.participant(), ParticipantId::new(3));
    }

    #[test]
    fn unknown_verbs_survive_decoding() {
        let wire = WireAction {
            verb: "teleport".to_owned(),
            params: vec![Param::Int(7), Param::Bytes(vec![0xde, 0xad])],
        };
        let packet = Packet::window(ParticipantId::new(1), vec![(Tick::new(9), vec![Action::from(wire.clone())])]);
        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        let PacketBody::Window { ticks, .. } = decoded.body else {
            panic!("expected a window");
        };
        assert_eq!(WireAction::from(ticks[0].1[0].clone()), wire);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = Packet::from_bytes(&[0xff; 3]).unwrap_err();
        assert!(err.to_string().contains("decoding packet"));
    }
}
