use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A board square. `x` grows to the right across all boards, `y` from White's back rank
/// (`0`) to Black's (`7`).
///
/// Ordering is by `x` then `y`, which is also the order the board iterates in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Coord {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Coord {
    /// Creates a coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The square `(dx, dy)` away from this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl From<(i32, i32)> for Coord {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Returned when a square is not written as `x,y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCoordError {
    input: String,
}

impl fmt::Display for ParseCoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected a square as x,y but got {:?}", self.input)
    }
}

impl std::error::Error for ParseCoordError {}

impl FromStr for Coord {
    type Err = ParseCoordError;

    /// Parses `x,y`, tolerating surrounding parentheses and spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCoordError {
            input: s.to_owned(),
        };
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (x, y) = trimmed.split_once(',').ok_or_else(err)?;
        let x = x.trim().parse().map_err(|_| err())?;
        let y = y.trim().parse().map_err(|_| err())?;
        Ok(Self { x, y })
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
    fn parses_plain_and_parenthesized() {
        assert_eq!("4,1".parse::<Coord>().unwrap(), Coord::new(4, 1));
        assert_eq!("(12, 7)".parse::<Coord>().unwrap(), Coord::new(12, 7));
    }

    #[test]
    fn rejects_garbage() {
        assert!("e4".parse::<Coord>().is_err());
        assert!("1;2".parse::<Coord>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let c = Coord::new(-1, 9);
        assert_eq!(c.to_string().parse::<Coord>().unwrap(), c);
    }

    #[test]
    fn orders_by_column_first() {
        assert!(Coord::new(0, 7) < Coord::new(1, 0));
    }
}
