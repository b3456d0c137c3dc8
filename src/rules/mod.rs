//! The rule engine: a board of pieces, the moves each piece may make, and what happens
//! when it makes one.
//!
//! The variant is real-time. There are no turns; instead every piece freezes for a while
//! after it moves, and every player is briefly frozen after any of their pieces moves.
//! Losing a King removes that player's whole army.
//!
//! Everything in this module is deterministic and free of I/O so that peers replaying the
//! same actions reach the same board.

mod board;
mod config;
mod coord;
mod game;
pub mod pattern;
mod piece;

pub use board::{Board, BOARD_HEIGHT, BOARD_WIDTH};
pub use config::RuleConfig;
pub use coord::{Coord, ParseCoordError};
pub use game::{Game, MoveOutcome, MoveReport, Rejection};
pub use pattern::{MovePattern, Ray};
pub use piece::{preferred_piece, Piece, PieceId, PieceKind};
