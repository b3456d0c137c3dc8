use std::fmt;

use serde::{Deserialize, Serialize};

use super::pattern::MovePattern;
use super::{Coord, RuleConfig};
use crate::{Player, Tick};

/// The six kinds of chess piece.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    /// Slides orthogonally. Castles with an unmoved King.
    Rook,
    /// Slides diagonally.
    Bishop,
    /// Slides in all eight directions.
    Queen,
    /// Jumps in an L.
    Knight,
    /// Steps one square. Its death removes its whole army.
    King,
    /// Advances, captures diagonally, promotes on the far rank.
    Pawn,
}

impl PieceKind {
    /// Back-rank order for each army, left to right.
    pub const BACK_RANK: [PieceKind; 8] = [
        PieceKind::Rook,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::King,
        PieceKind::Queen,
        PieceKind::Bishop,
        PieceKind::Knight,
        PieceKind::Rook,
    ];

    /// Lower-case name used in move messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rook => "rook",
            Self::Bishop => "bishop",
            Self::Queen => "queen",
            Self::Knight => "knight",
            Self::King => "king",
            Self::Pawn => "pawn",
        }
    }

    /// Ticks this kind stays frozen after moving.
    #[must_use]
    pub const fn freeze_time(self, config: &RuleConfig) -> u32 {
        match self {
            Self::King => config.king_freeze_time,
            _ => config.freeze_time,
        }
    }

    /// Tie-break rank when several pieces could answer one click; lower wins.
    #[must_use]
    pub const fn move_preference(self) -> u8 {
        match self {
            Self::King => 0,
            Self::Pawn => 1,
            Self::Knight => 2,
            Self::Bishop => 3,
            Self::Rook => 4,
            Self::Queen => 5,
        }
    }

    /// RGB tint for drawing the squares this kind can see.
    #[must_use]
    pub const fn sight_color(self) -> [f32; 3] {
        match self {
            Self::Rook => [0.5, 0.5, 1.0],
            Self::Bishop => [0.0, 0.0, 1.0],
            Self::Queen => [1.0, 0.0, 0.0],
            Self::Knight => [0.0, 1.0, 0.0],
            Self::King => [0.0, 1.0, 1.0],
            Self::Pawn => [0.5, 0.5, 0.5],
        }
    }

    /// The ray pattern for this kind. Pawns have no fixed pattern and return an empty one.
    #[must_use]
    pub fn pattern(self) -> MovePattern {
        match self {
            Self::Rook => MovePattern::rook(),
            Self::Bishop => MovePattern::bishop(),
            Self::Queen => MovePattern::queen(),
            Self::Knight => MovePattern::knight(),
            Self::King => MovePattern::king(),
            Self::Pawn => MovePattern::default(),
        }
    }
}

impl fmt::Display for PieceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable handle for a piece, assigned in creation order so every peer agrees on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PieceId(pub u32);

/// A piece on the board. The board owns pieces by value; nothing points back at the game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    /// Creation-order handle.
    pub id: PieceId,
    /// What kind of piece this is.
    pub kind: PieceKind,
    /// Owning seat.
    pub player: Player,
    /// Current square.
    pub position: Coord,
    /// The piece may not move while the tick is below this.
    pub freeze_until: Tick,
    /// `None` until the piece first moves.
    pub last_move_tick: Option<Tick>,
    /// Square the piece last moved from; drives move animation and en passant.
    pub last_position: Option<Coord>,
}

impl Piece {
    /// A piece that has never moved and is not frozen.
    #[must_use]
    pub const fn new(id: PieceId, kind: PieceKind, player: Player, position: Coord) -> Self {
        Self {
            id,
            kind,
            player,
            position,
            freeze_until: Tick::ZERO,
            last_move_tick: None,
            last_position: None,
        }
    }

    /// `0` for White, `1` for Black.
    #[must_use]
    pub const fn side(&self) -> u8 {
        self.player.side()
    }

    /// Whether the piece has moved since it was created.
    #[must_use]
    pub const fn has_moved(&self) -> bool {
        self.last_move_tick.is_some()
    }

    /// Whether `other` belongs to the opposing side.
    #[must_use]
    pub const fn is_enemy_of(&self, other: &Piece) -> bool {
        self.side() != other.side()
    }
}

/// Picks the piece a click should grab when several are candidates, by [`PieceKind::move_preference`].
///
/// ```
/// use lockstep_chess::rules::{preferred_piece, Piece, PieceId, PieceKind};
/// use lockstep_chess::{Coord, Player};
///
/// let queen = Piece::new(PieceId(0), PieceKind::Queen, Player::new(0), Coord::new(3, 3));
/// let pawn = Piece::new(PieceId(1), PieceKind::Pawn, Player::new(0), Coord::new(4, 2));
/// assert_eq!(preferred_piece([&queen, &pawn]).map(|p| p.kind), Some(PieceKind::Pawn));
/// ```
pub fn preferred_piece<'a>(candidates: impl IntoIterator<Item = &'a Piece>) -> Option<&'a Piece> {
    candidates
        .into_iter()
        .min_by_key(|piece| piece.kind.move_preference())
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
    fn king_freezes_shorter() {
        let config = RuleConfig::standard();
        assert_eq!(PieceKind::King.freeze_time(&config), 60);
        assert_eq!(PieceKind::Knight.freeze_time(&config), 80);
    }

    #[test]
    fn move_preference_order() {
        let mut kinds = [
            PieceKind::Queen,
            PieceKind::Rook,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Pawn,
            PieceKind::King,
        ];
        kinds.sort_by_key(|k| k.move_preference());
        assert_eq!(
            kinds,
            [
                PieceKind::King,
                PieceKind::Pawn,
                PieceKind::Knight,
                PieceKind::Bishop,
                PieceKind::Rook,
                PieceKind::Queen,
            ]
        );
    }

    #[test]
    fn enemies_are_by_side_not_seat() {
        let white0 = Piece::new(PieceId(0), PieceKind::Pawn, Player::new(0), Coord::new(0, 1));
        let white2 = Piece::new(PieceId(1), PieceKind::Pawn, Player::new(2), Coord::new(8, 1));
        let black1 = Piece::new(PieceId(2), PieceKind::Pawn, Player::new(1), Coord::new(0, 6));
        assert!(!white0.is_enemy_of(&white2));
        assert!(white0.is_enemy_of(&black1));
    }

    #[test]
    fn pawn_has_no_fixed_pattern() {
        assert!(PieceKind::Pawn.pattern().rays().is_empty());
        assert_eq!(PieceKind::Queen.pattern().rays().len(), 8);
    }
}
