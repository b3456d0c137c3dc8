//! Every packet on the wire goes through this module, so all peers agree on one bincode
//! configuration: the standard layout with fixed-width integers.
//!
//! ```
//! use lockstep_chess::network::codec::{decode_value, encode};
//! use lockstep_chess::{Packet, ParticipantId};
//!
//! let packet = Packet::hello(ParticipantId::new(9));
//! let bytes = encode(&packet).expect("encoding should succeed");
//! let decoded: Packet = decode_value(&bytes).expect("decoding should succeed");
//! assert_eq!(packet, decoded);
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

// Fixed-width integers keep the encoding identical on every platform.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// What was being encoded or decoded when a codec error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// Encoding an outbound packet.
    EncodePacket,
    /// Decoding an inbound datagram.
    DecodePacket,
    /// Encoding into a caller-provided buffer.
    EncodeIntoBuffer,
    /// A generic encoding operation.
    Encode,
    /// A generic decoding operation.
    Decode,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodePacket => write!(f, "encoding packet"),
            Self::DecodePacket => write!(f, "decoding packet"),
            Self::EncodeIntoBuffer => write!(f, "encoding into buffer"),
            Self::Encode => write!(f, "encoding"),
            Self::Decode => write!(f, "decoding"),
        }
    }
}

/// Errors that can occur during encoding or decoding.
///
/// Bincode errors carry no structure beyond their `Display` text, so the message is kept
/// as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The decoding operation failed.
    DecodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The provided buffer was too small for encoding.
    BufferTooSmall {
        /// The actual buffer size provided.
        provided: usize,
    },
}

impl CodecError {
    /// Creates a new encode error with the given message and operation.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a new decode error with the given message and operation.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }

    /// Tags the error with a more specific operation.
    #[must_use]
    pub fn during(self, operation: CodecOperation) -> Self {
        match self {
            Self::EncodeError { message, .. } => Self::EncodeError { message, operation },
            Self::DecodeError { message, .. } => Self::DecodeError { message, operation },
            other => other,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message, operation } => {
                write!(f, "encoding failed while {operation}: {message}")
            },
            Self::DecodeError { message, operation } => {
                write!(f, "decoding failed while {operation}: {message}")
            },
            Self::BufferTooSmall { provided } => {
                write!(f, "buffer too small: only {provided} bytes provided")
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::Encode))
}

/// Encodes a value into an existing byte slice and returns the number of bytes written.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if the buffer is not large enough.
pub fn encode_into<T: Serialize>(value: &T, buffer: &mut [u8]) -> CodecResult<usize> {
    bincode::serde::encode_into_slice(value, buffer, config()).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("UnexpectedEnd") || msg.contains("not enough") {
            CodecError::BufferTooSmall {
                provided: buffer.len(),
            }
        } else {
            CodecError::encode(msg, CodecOperation::EncodeIntoBuffer)
        }
    })
}

/// Decodes a value from a byte slice, returning it with the number of bytes consumed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::Decode))
}

/// Decodes a value from a byte slice, ignoring the bytes consumed.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    decode(bytes).map(|(value, _)| value)
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
    use crate::action::Action;
    use crate::network::messages::Packet;
    use crate::rules::Coord;
    use crate::{ParticipantId, Tick};

    fn window() -> Packet {
        Packet::window(
            ParticipantId::new(0xfeed),
            vec![
                (Tick::new(3), vec![]),
                (
                    Tick::new(4),
                    vec![
                        Action::Move {
                            src: Coord::new(1, 0),
                            dst: Coord::new(2, 2),
                        },
                        Action::Nick {
                            name: "ann".to_owned(),
                        },
                    ],
                ),
            ],
        )
    }

    #[test]
    fn window_packet_decodes_to_same_actions() {
        let original = window();
        let bytes = encode(&original).unwrap();
        let (decoded, len): (Packet, _) = decode(&bytes).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(len, bytes.len());
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode(&window()).unwrap(), encode(&window()).unwrap());
    }

    #[test]
    fn encode_into_buffer_too_small() {
        let mut buffer = [0u8; 4];
        let result = encode_into(&window(), &mut buffer);
        assert!(matches!(
            result,
            Err(CodecError::BufferTooSmall { .. } | CodecError::EncodeError { .. })
        ));
    }

    #[test]
    fn truncated_packet_fails_to_decode() {
        let bytes = encode(&window()).unwrap();
        let result: CodecResult<Packet> = decode_value(&bytes[..bytes.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn during_retags_operation() {
        let err = CodecError::decode("eof", CodecOperation::Decode).during(CodecOperation::DecodePacket);
        assert!(err.to_string().contains("decoding packet"));
    }
}
