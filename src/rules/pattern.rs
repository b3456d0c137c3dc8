//! Movement patterns built by composing ray generators.
//!
//! A pattern is a list of rays. A slide ray walks outward one square at a time until it
//! leaves the board; a step ray is a single offset. The Queen is simply the rook slides
//! followed by the bishop slides.

use smallvec::SmallVec;

use super::Coord;

/// The squares along one ray, nearest first, clipped to the board.
pub type Streak = SmallVec<[Coord; 8]>;

/// Orthogonal directions.
pub const ROOK_DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
/// Diagonal directions.
pub const BISHOP_DIRECTIONS: [(i32, i32); 4] = [(1, 1), (-1, -1), (1, -1), (-1, 1)];
/// Knight jumps.
pub const KNIGHT_OFFSETS: [(i32, i32); 8] = [
    (-1, -2),
    (-2, -1),
    (-1, 2),
    (2, -1),
    (1, -2),
    (-2, 1),
    (1, 2),
    (2, 1),
];
/// The eight neighbouring squares.
pub const KING_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// One direction of movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ray {
    /// Repeats the offset until the board ends.
    Slide(i32, i32),
    /// A single jump.
    Step(i32, i32),
}

impl Ray {
    /// Walks this ray from `origin` on a `width` by `height` board.
    #[must_use]
    pub fn streak(self, origin: Coord, width: i32, height: i32) -> Streak {
        let in_bounds = |c: Coord| (0..width).contains(&c.x) && (0..height).contains(&c.y);
        let mut squares = Streak::new();
        match self {
            Ray::Step(dx, dy) => {
                let dst = origin.offset(dx, dy);
                if in_bounds(dst) {
                    squares.push(dst);
                }
            },
            Ray::Slide(dx, dy) => {
                let mut dst = origin.offset(dx, dy);
                while in_bounds(dst) {
                    squares.push(dst);
                    dst = dst.offset(dx, dy);
                }
            },
        }
        squares
    }
}

/// An ordered list of rays.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MovePattern {
    rays: SmallVec<[Ray; 8]>,
}

impl MovePattern {
    /// Sliding rays along each direction.
    #[must_use]
    pub fn slides(directions: &[(i32, i32)]) -> Self {
        Self {
            rays: directions.iter().map(|&(dx, dy)| Ray::Slide(dx, dy)).collect(),
        }
    }

    /// Single-step rays for each offset.
    #[must_use]
    pub fn steps(offsets: &[(i32, i32)]) -> Self {
        Self {
            rays: offsets.iter().map(|&(dx, dy)| Ray::Step(dx, dy)).collect(),
        }
    }

    /// This pattern's rays followed by `other`'s.
    #[must_use]
    pub fn chain(mut self, other: MovePattern) -> Self {
        self.rays.extend(other.rays);
        self
    }

    /// Four orthogonal slides.
    #[must_use]
    pub fn rook() -> Self {
        Self::slides(&ROOK_DIRECTIONS)
    }

    /// Four diagonal slides.
    #[must_use]
    pub fn bishop() -> Self {
        Self::slides(&BISHOP_DIRECTIONS)
    }

    /// Rook slides followed by bishop slides.
    #[must_use]
    pub fn queen() -> Self {
        Self::rook().chain(Self::bishop())
    }

    /// The eight knight jumps.
    #[must_use]
    pub fn knight() -> Self {
        Self::steps(&KNIGHT_OFFSETS)
    }

    /// One step in each of the eight directions.
    #[must_use]
    pub fn king() -> Self {
        Self::steps(&KING_OFFSETS)
    }

    /// The rays in order.
    #[must_use]
    pub fn rays(&self) -> &[Ray] {
        &self.rays
    }

    /// Every streak of this pattern from `origin`.
    pub fn streaks(&self, origin: Coord, width: i32, height: i32) -> impl Iterator<Item = Streak> + '_ {
        self.rays
            .iter()
            .map(move |ray| ray.streak(origin, width, height))
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
    fn queen_is_rook_then_bishop() {
        let queen = MovePattern::queen();
        assert_eq!(queen.rays().len(), 8);
        assert_eq!(&queen.rays()[..4], MovePattern::rook().rays());
        assert_eq!(&queen.rays()[4..], MovePattern::bishop().rays());
    }

    #[test]
    fn slide_stops_at_edge() {
        let streak = Ray::Slide(1, 0).streak(Coord::new(5, 0), 8, 8);
        assert_eq!(streak.as_slice(), &[Coord::new(6, 0), Coord::new(7, 0)]);
    }

    #[test]
    fn step_off_board_is_empty() {
        assert!(Ray::Step(-1, -2).streak(Coord::new(0, 0), 8, 8).is_empty());
    }

    #[test]
    fn knight_in_corner_has_two_jumps() {
        let count: usize = MovePattern::knight()
            .streaks(Coord::new(0, 0), 8, 8)
            .map(|s| s.len())
            .sum();
        assert_eq!(count, 2);
    }

    #[test]
    fn wide_board_extends_rook_rays() {
        let east = Ray::Slide(1, 0).streak(Coord::new(0, 0), 16, 8);
        assert_eq!(east.len(), 15);
    }
}
