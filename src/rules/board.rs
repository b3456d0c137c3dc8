use std::collections::BTreeMap;

use super::{Coord, Piece, PieceId, PieceKind};
use crate::hash::DeterministicHasher;
use crate::Player;
use std::hash::{Hash, Hasher};

/// Width of one board in squares.
pub const BOARD_WIDTH: i32 = 8;
/// Height of every board in squares.
pub const BOARD_HEIGHT: i32 = 8;

/// Where each seat's army starts: `(x offset, back rank row, pawn row)`.
const ARMY_ORIGINS: [(i32, i32, i32); 4] = [(0, 0, 1), (0, 7, 6), (8, 0, 1), (8, 7, 6)];

/// Pieces keyed by square.
///
/// The map is ordered, so iteration (and therefore the checksum) is identical on every peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: i32,
    height: i32,
    squares: BTreeMap<Coord, Piece>,
}

impl Board {
    /// An empty board `8 * num_boards` squares wide.
    #[must_use]
    pub fn empty(num_boards: u8) -> Self {
        Self {
            width: BOARD_WIDTH * i32::from(num_boards),
            height: BOARD_HEIGHT,
            squares: BTreeMap::new(),
        }
    }

    /// The opening layout for `2 * num_boards` players. Piece IDs start at zero.
    #[must_use]
    pub fn standard(num_boards: u8) -> Self {
        let mut board = Self::empty(num_boards);
        let num_players = usize::from(num_boards) * 2;
        let mut next_id = 0;
        for (seat, &(x0, back_row, pawn_row)) in ARMY_ORIGINS.iter().take(num_players).enumerate() {
            let player = Player::new(seat as u8);
            for (dx, &kind) in PieceKind::BACK_RANK.iter().enumerate() {
                let x = x0 + dx as i32;
                for (kind, y) in [(kind, back_row), (PieceKind::Pawn, pawn_row)] {
                    let position = Coord::new(x, y);
                    board.insert(Piece::new(PieceId(next_id), kind, player, position));
                    next_id += 1;
                }
            }
        }
        board
    }

    /// Board width in squares.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Board height in squares.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Whether `c` lies on the board.
    #[must_use]
    pub fn in_bounds(&self, c: Coord) -> bool {
        (0..self.width).contains(&c.x) && (0..self.height).contains(&c.y)
    }

    /// The piece on `c`, if any.
    #[must_use]
    pub fn get(&self, c: Coord) -> Option<&Piece> {
        self.squares.get(&c)
    }

    /// Whether `c` holds a piece.
    #[must_use]
    pub fn is_occupied(&self, c: Coord) -> bool {
        self.squares.contains_key(&c)
    }

    /// All pieces in square order.
    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.squares.values()
    }

    /// Pieces belonging to `player`.
    pub fn pieces_of(&self, player: Player) -> impl Iterator<Item = &Piece> {
        self.squares.values().filter(move |p| p.player == player)
    }

    /// Finds a piece by handle.
    #[must_use]
    pub fn find(&self, id: PieceId) -> Option<&Piece> {
        self.squares.values().find(|p| p.id == id)
    }

    /// The King of `player`, if it is still alive.
    #[must_use]
    pub fn king_of(&self, player: Player) -> Option<&Piece> {
        self.pieces_of(player).find(|p| p.kind == PieceKind::King)
    }

    /// Number of pieces on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.squares.len()
    }

    /// Whether the board has no pieces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.squares.is_empty()
    }

    /// Largest piece ID on the board plus one.
    #[must_use]
    pub fn next_piece_id(&self) -> u32 {
        self.squares
            .values()
            .map(|p| p.id.0 + 1)
            .max()
            .unwrap_or(0)
    }

    /// Places `piece` on its own square, returning whatever was there.
    pub(crate) fn insert(&mut self, piece: Piece) -> Option<Piece> {
        self.squares.insert(piece.position, piece)
    }

    pub(crate) fn remove(&mut self, c: Coord) -> Option<Piece> {
        self.squares.remove(&c)
    }

    /// Removes every piece of `player`, returning them in square order.
    pub(crate) fn remove_army(&mut self, player: Player) -> Vec<Piece> {
        let squares: Vec<Coord> = self
            .squares
            .values()
            .filter(|p| p.player == player)
            .map(|p| p.position)
            .collect();
        squares
            .into_iter()
            .filter_map(|c| self.squares.remove(&c))
            .collect()
    }

    /// Feeds every piece into `hasher` in square order.
    pub(crate) fn hash_into(&self, hasher: &mut DeterministicHasher) {
        self.width.hash(hasher);
        for piece in self.squares.values() {
            piece.hash(hasher);
        }
    }

    /// Deterministic checksum of the pieces alone.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DeterministicHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
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

    #[test]
    fn single_board_layout() {
        let board = Board::standard(1);
        assert_eq!(board.len(), 32);
        assert_eq!(board.width(), 8);
        assert_eq!(board.get(Coord::new(3, 0)).unwrap().kind, PieceKind::King);
        assert_eq!(board.get(Coord::new(4, 7)).unwrap().kind, PieceKind::Queen);
        assert_eq!(board.get(Coord::new(5, 6)).unwrap().kind, PieceKind::Pawn);
        assert_eq!(board.get(Coord::new(5, 6)).unwrap().player, Player::new(1));
    }

    #[test]
    fn two_board_layout_seats_four_armies() {
        let board = Board::standard(2);
        assert_eq!(board.len(), 64);
        assert_eq!(board.width(), 16);
        for seat in 0..4 {
            assert_eq!(board.pieces_of(Player::new(seat)).count(), 16);
            assert!(board.king_of(Player::new(seat)).is_some());
        }
        assert_eq!(board.get(Coord::new(11, 7)).unwrap().player, Player::new(3));
    }

    #[test]
    fn piece_ids_are_unique_and_dense() {
        let board = Board::standard(2);
        let mut ids: Vec<u32> = board.pieces().map(|p| p.id.0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64);
        assert_eq!(board.next_piece_id(), 64);
    }

    #[test]
    fn identical_layouts_share_checksum() {
        assert_eq!(Board::standard(1).checksum(), Board::standard(1).checksum());
        assert_ne!(Board::standard(1).checksum(), Board::standard(2).checksum());
    }

    #[test]
    fn remove_army_leaves_others() {
        let mut board = Board::standard(1);
        let removed = board.remove_army(Player::new(0));
        assert_eq!(removed.len(), 16);
        assert_eq!(board.len(), 16);
        assert!(board.king_of(Player::new(0)).is_none());
    }
}
