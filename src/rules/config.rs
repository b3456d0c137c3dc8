use crate::error::ChessError;

/// Timing and layout constants for the rule engine.
///
/// Every peer in a match must use the same values; they are not negotiated over the wire.
///
/// ```
/// use lockstep_chess::RuleConfig;
///
/// let config = RuleConfig::standard();
/// assert_eq!(config.freeze_time, 80);
/// assert_eq!(RuleConfig::dev().player_freeze_time, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleConfig {
    /// Boards side by side; each board seats two players. One or two.
    pub num_boards: u8,
    /// Ticks a piece stays frozen after it moves.
    pub freeze_time: u32,
    /// Ticks a King stays frozen after it moves.
    pub king_freeze_time: u32,
    /// Ticks before any piece of the same player may move again.
    pub player_freeze_time: u32,
    /// Extra freeze on a Queen created by promotion.
    pub egg_time: u32,
    /// How many ticks after a two-square pawn advance the pawn may still be taken en passant.
    pub en_passant_window: u32,
}

impl RuleConfig {
    /// Most boards a match can use: four armies fill the army layout table.
    pub const MAX_BOARDS: u8 = 2;

    /// The rules as played online.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            num_boards: 1,
            freeze_time: 80,
            king_freeze_time: 60,
            player_freeze_time: 20,
            egg_time: 60,
            en_passant_window: 1,
        }
    }

    /// Standard rules without the per-player rate limit, for local experimentation.
    #[must_use]
    pub const fn dev() -> Self {
        Self {
            player_freeze_time: 0,
            ..Self::standard()
        }
    }

    /// Checks that the layout can be built.
    pub fn validate(&self) -> Result<(), ChessError> {
        if self.num_boards == 0 || self.num_boards > Self::MAX_BOARDS {
            return Err(ChessError::InvalidRequest {
                info: format!(
                    "num_boards must be between 1 and {}, got {}",
                    Self::MAX_BOARDS,
                    self.num_boards
                ),
            });
        }
        Ok(())
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self::standard()
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
    fn standard_validates() {
        assert!(RuleConfig::standard().validate().is_ok());
    }

    #[test]
    fn board_count_is_bounded() {
        let mut config = RuleConfig::standard();
        config.num_boards = 0;
        assert!(config.validate().is_err());
        config.num_boards = 3;
        assert!(config.validate().is_err());
        config.num_boards = 2;
        assert!(config.validate().is_ok());
    }
}
