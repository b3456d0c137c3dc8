use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;
use crate::{ParticipantId, Tick};

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), ChessError>`].
///
/// [`Result<(), ChessError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChessError {
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// A participant announced an action list for a tick that contradicts the list already
    /// recorded for that (tick, participant) pair. The session halts once this happens.
    ProtocolViolation {
        /// The tick whose entry disagreed.
        tick: Tick,
        /// The participant that announced the conflicting list.
        participant: ParticipantId,
    },
    /// An action could not be applied. Raised by action handlers and reported as a message,
    /// never propagated out of the tick loop.
    InvalidAction {
        /// The verb of the failing action.
        verb: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Serialization or deserialization of data failed.
    SerializationError {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// A network socket operation failed.
    SocketError {
        /// A description of the socket error.
        context: String,
    },
    /// A request to the matchmaking lookup service failed.
    DiscoveryError {
        /// A description of the failed request.
        context: String,
    },
    /// The lookup service does not know the requested match address.
    NoSuchGame {
        /// The address that was looked up.
        address: String,
    },
}

impl ChessError {
    pub(crate) fn invalid_action(verb: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            verb: verb.into(),
            reason: reason.into(),
        }
    }
}

impl Display for ChessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChessError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
            ChessError::ProtocolViolation { tick, participant } => {
                write!(
                    f,
                    "Participant {} announced conflicting actions for tick {}",
                    participant, tick
                )
            }
            ChessError::InvalidAction { verb, reason } => {
                write!(f, "action {} failed: {}", verb, reason)
            }
            ChessError::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            }
            ChessError::SocketError { context } => {
                write!(f, "Socket error: {}", context)
            }
            ChessError::DiscoveryError { context } => {
                write!(f, "Discovery error: {}", context)
            }
            ChessError::NoSuchGame { address } => {
                write!(f, "No such game: {}", address)
            }
        }
    }
}

impl Error for ChessError {}

impl From<CodecError> for ChessError {
    fn from(err: CodecError) -> Self {
        ChessError::SerializationError {
            context: err.to_string(),
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
    use crate::network::codec::CodecOperation;

    #[test]
    fn protocol_violation_names_tick_and_participant() {
        let err = ChessError::ProtocolViolation {
            tick: Tick::new(42),
            participant: ParticipantId::new(7),
        };
        let text = err.to_string();
        assert!(text.contains("42"));
        assert!(text.contains("conflicting"));
    }

    #[test]
    fn invalid_action_display_matches_tick_loop_message() {
        let err = ChessError::invalid_action("become", "no such player 9");
        assert_eq!(err.to_string(), "action become failed: no such player 9");
    }

    #[test]
    fn codec_errors_convert_to_serialization_errors() {
        let err: ChessError = CodecError::decode("truncated", CodecOperation::DecodePacket).into();
        assert!(matches!(err, ChessError::SerializationError { .. }));
    }
}
