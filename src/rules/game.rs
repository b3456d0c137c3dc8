use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;
use tracing::trace;

use super::pattern::MovePattern;
use super::{Board, Coord, Piece, PieceId, PieceKind, RuleConfig};
use crate::hash::DeterministicHasher;
use crate::{Player, Tick};

/// Why a move was not applied. None of these are errors: a move queued a few ticks ago may
/// simply have been overtaken by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No piece stands on the source square.
    NoPiece,
    /// The piece that was addressed is no longer where the action expected it.
    Stale,
    /// The piece or its player is still frozen.
    Frozen,
    /// The destination is not among the piece's moves.
    Illegal,
}

/// What a successful move did to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    /// The piece that moved.
    pub piece: PieceId,
    /// Its kind before any promotion.
    pub kind: PieceKind,
    /// Its owner.
    pub player: Player,
    /// Source square.
    pub from: Coord,
    /// Destination square.
    pub to: Coord,
    /// The piece taken, including one taken en passant.
    pub captured: Option<Piece>,
    /// Set when the move was a castle: the Rook's source and destination.
    pub castled_rook: Option<(Coord, Coord)>,
    /// Set when the capture was en passant: the square the taken pawn stood on.
    pub en_passant: Option<Coord>,
    /// Set when a pawn reached the far rank and became a Queen.
    pub promoted_to: Option<PieceId>,
    /// Players whose King died in this move; their armies are already gone.
    pub kings_captured: SmallVec<[Player; 1]>,
}

/// Result of [`Game::move_piece`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The board changed.
    Moved(MoveReport),
    /// The board is untouched.
    Rejected(Rejection),
}

impl MoveOutcome {
    /// Whether the board changed.
    #[must_use]
    pub const fn is_moved(&self) -> bool {
        matches!(self, Self::Moved(_))
    }
}

/// The rule engine: a board, the tick it is at, and the per-player freeze map.
///
/// Everything here is deterministic. Two games fed the same moves at the same ticks end
/// with equal [`Game::checksum`]s.
///
/// ```
/// use lockstep_chess::{Coord, Game, RuleConfig, Tick};
///
/// let mut game = Game::new(RuleConfig::standard());
/// game.set_tick(Tick::new(10));
/// let outcome = game.move_piece(Coord::new(4, 1), Coord::new(4, 3));
/// assert!(outcome.is_moved());
/// assert!(game.moves(Coord::new(4, 3)).is_empty()); // frozen after moving
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    config: RuleConfig,
    board: Board,
    tick: Tick,
    player_freeze: BTreeMap<Player, Tick>,
    next_piece_id: u32,
}

impl Game {
    /// A game at tick zero with the opening layout for `config.num_boards`.
    #[must_use]
    pub fn new(config: RuleConfig) -> Self {
        let board = Board::standard(config.num_boards);
        let next_piece_id = board.next_piece_id();
        Self {
            config,
            board,
            tick: Tick::ZERO,
            player_freeze: BTreeMap::new(),
            next_piece_id,
        }
    }

    /// A game on an empty board, for setting up positions with [`Game::place`].
    #[must_use]
    pub fn empty(config: RuleConfig) -> Self {
        Self {
            board: Board::empty(config.num_boards),
            ..Self::new(config)
        }
        .with_fresh_ids()
    }

    fn with_fresh_ids(mut self) -> Self {
        self.next_piece_id = self.board.next_piece_id();
        self
    }

    /// Restores the opening layout, optionally changing the number of boards. The tick is kept.
    pub fn reset(&mut self, num_boards: Option<u8>) {
        if let Some(n) = num_boards {
            self.config.num_boards = n;
        }
        self.board = Board::standard(self.config.num_boards);
        self.player_freeze.clear();
        self.next_piece_id = self.board.next_piece_id();
    }

    /// Puts a fresh, unmoved piece on `at`, replacing anything there.
    pub fn place(&mut self, kind: PieceKind, player: Player, at: Coord) -> PieceId {
        let id = self.allocate_id();
        self.board.insert(Piece::new(id, kind, player, at));
        id
    }

    fn allocate_id(&mut self) -> PieceId {
        let id = PieceId(self.next_piece_id);
        self.next_piece_id += 1;
        id
    }

    /// The rule constants in force.
    #[must_use]
    pub const fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// The board.
    #[must_use]
    pub const fn board(&self) -> &Board {
        &self.board
    }

    /// Boards in play.
    #[must_use]
    pub const fn num_boards(&self) -> u8 {
        self.config.num_boards
    }

    /// Seats in play: two per board.
    #[must_use]
    pub const fn num_players(&self) -> u8 {
        self.config.num_boards * 2
    }

    /// The current tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Moves the simulation clock. Only the session should call this.
    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// The tick before which no piece of `player` may move.
    #[must_use]
    pub fn player_freeze(&self, player: Player) -> Tick {
        self.player_freeze
            .get(&player)
            .copied()
            .unwrap_or(Tick::ZERO)
    }

    /// Whether `piece` is still cooling down at the current tick.
    #[must_use]
    pub fn is_frozen(&self, piece: &Piece) -> bool {
        self.tick < piece.freeze_until.max(self.player_freeze(piece.player))
    }

    /// Legal destinations for the piece on `at`, or nothing if it is frozen.
    ///
    /// Recomputed on every call; the board may have changed since the last one.
    #[must_use]
    pub fn moves(&self, at: Coord) -> Vec<Coord> {
        match self.board.get(at) {
            Some(piece) if !self.is_frozen(piece) => self.base_moves_of(piece),
            _ => Vec::new(),
        }
    }

    /// Destinations for the piece on `at`, ignoring freezes.
    #[must_use]
    pub fn base_moves(&self, at: Coord) -> Vec<Coord> {
        self.board
            .get(at)
            .map(|piece| self.base_moves_of(piece))
            .unwrap_or_default()
    }

    fn base_moves_of(&self, piece: &Piece) -> Vec<Coord> {
        let mut out = Vec::new();
        self.walk_streaks(piece, &mut out);
        match piece.kind {
            PieceKind::King => out.extend(self.castling_destinations(piece)),
            PieceKind::Pawn => out.extend(self.en_passant_targets(piece).map(|(dst, _)| dst)),
            _ => {},
        }
        out
    }

    /// Stops before an ally, stops on an enemy, stops at the edge.
    fn walk_streaks(&self, piece: &Piece, out: &mut Vec<Coord>) {
        for streak in self.streaks(piece) {
            for dst in streak {
                match self.board.get(dst) {
                    Some(other) if !other.is_enemy_of(piece) => break,
                    Some(_) => {
                        out.push(dst);
                        break;
                    },
                    None => out.push(dst),
                }
            }
        }
    }

    fn streaks(&self, piece: &Piece) -> Vec<SmallVec<[Coord; 8]>> {
        let (w, h) = (self.board.width(), self.board.height());
        if piece.kind != PieceKind::Pawn {
            return piece.kind.pattern().streaks(piece.position, w, h).collect();
        }

        let (start_row, delta) = pawn_direction(piece);
        let Coord { x, y } = piece.position;
        let mut forward: SmallVec<[Coord; 8]> = SmallVec::new();
        forward.push(Coord::new(x, y + delta));
        if y == start_row {
            forward.push(Coord::new(x, y + 2 * delta));
        }
        if let Some(blocked) = forward.iter().position(|&c| self.board.is_occupied(c)) {
            forward.truncate(blocked);
        }
        forward.retain(|c| self.board.in_bounds(*c));

        let mut streaks = vec![forward];
        for a in [x - 1, x + 1] {
            let diagonal = Coord::new(a, y + delta);
            if self.board.is_occupied(diagonal) {
                streaks.push(SmallVec::from_elem(diagonal, 1));
            }
        }
        streaks
    }

    /// Squares the King may castle to: toward an unmoved Rook of its own with nothing in between,
    /// at least two squares away and short of the Rook.
    fn castling_destinations(&self, king: &Piece) -> Vec<Coord> {
        let mut out = Vec::new();
        if king.has_moved() {
            return out;
        }
        for dir in [-1, 1] {
            if let Some(rook) = self.castling_rook(king, dir) {
                let distance = (rook.position.x - king.position.x).abs();
                for step in 2..distance {
                    out.push(king.position.offset(step * dir, 0));
                }
            }
        }
        out
    }

    fn castling_rook(&self, king: &Piece, dir: i32) -> Option<&Piece> {
        let mut c = king.position.offset(dir, 0);
        while self.board.in_bounds(c) {
            if let Some(piece) = self.board.get(c) {
                let eligible = piece.kind == PieceKind::Rook
                    && piece.player == king.player
                    && !piece.has_moved();
                return eligible.then_some(piece);
            }
            c = c.offset(dir, 0);
        }
        None
    }

    /// `(landing square, victim square)` for each en passant capture open to `pawn`.
    fn en_passant_targets<'a>(&'a self, pawn: &'a Piece) -> impl Iterator<Item = (Coord, Coord)> + 'a {
        let (_, delta) = pawn_direction(pawn);
        let Coord { x, y } = pawn.position;
        [x - 1, x + 1].into_iter().filter_map(move |a| {
            let victim_square = Coord::new(a, y);
            let landing = Coord::new(a, y + delta);
            let victim = self.board.get(victim_square)?;
            let just_double_stepped = victim.kind == PieceKind::Pawn
                && victim.is_enemy_of(pawn)
                && victim
                    .last_position
                    .is_some_and(|from| from.x == a && (from.y - y).abs() == 2)
                && victim.last_move_tick.is_some_and(|t| {
                    self.tick.ticks_since(t) <= self.config.en_passant_window
                });
            (just_double_stepped && self.board.in_bounds(landing) && !self.board.is_occupied(landing))
                .then_some((landing, victim_square))
        })
    }

    /// Squares the piece on `at` observes, ignoring freezes.
    ///
    /// A King also sees every square holding a piece that could capture it. A Pawn also sees
    /// both forward diagonals, occupied or not.
    #[must_use]
    pub fn sight(&self, at: Coord) -> Vec<Coord> {
        let Some(piece) = self.board.get(at) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        self.walk_streaks(piece, &mut out);
        match piece.kind {
            PieceKind::King => out.extend(self.threats_to(piece)),
            PieceKind::Pawn => {
                let (_, delta) = pawn_direction(piece);
                let Coord { x, y } = piece.position;
                for a in [x - 1, x + 1] {
                    let diagonal = Coord::new(a, y + delta);
                    if self.board.in_bounds(diagonal) && !out.contains(&diagonal) {
                        out.push(diagonal);
                    }
                }
                out.extend(self.en_passant_targets(piece).map(|(dst, _)| dst));
            },
            _ => {},
        }
        out
    }

    /// Squares of pieces, met first along a knight jump or queen ray from `king`, that could
    /// move onto the King.
    fn threats_to<'a>(&'a self, king: &'a Piece) -> impl Iterator<Item = Coord> + 'a {
        let (w, h) = (self.board.width(), self.board.height());
        let rays = MovePattern::knight().chain(MovePattern::queen());
        let streaks: Vec<_> = rays.streaks(king.position, w, h).collect();
        streaks.into_iter().filter_map(move |streak| {
            let first = streak.into_iter().find(|&c| self.board.is_occupied(c))?;
            let attacker = self.board.get(first)?;
            self.base_moves_of(attacker)
                .contains(&king.position)
                .then_some(first)
        })
    }

    /// Moves the piece on `src` to `dst` if that is one of its moves right now.
    pub fn move_piece(&mut self, src: Coord, dst: Coord) -> MoveOutcome {
        match self.board.get(src) {
            Some(piece) => {
                let id = piece.id;
                self.apply_move(id, src, dst)
            },
            None => MoveOutcome::Rejected(Rejection::NoPiece),
        }
    }

    /// Moves the piece with handle `id` to `dst`, wherever it currently stands.
    pub fn move_piece_by_id(&mut self, id: PieceId, dst: Coord) -> MoveOutcome {
        match self.board.find(id) {
            Some(piece) => {
                let src = piece.position;
                self.apply_move(id, src, dst)
            },
            None => MoveOutcome::Rejected(Rejection::Stale),
        }
    }

    fn apply_move(&mut self, id: PieceId, src: Coord, dst: Coord) -> MoveOutcome {
        let Some(piece) = self.board.get(src) else {
            return MoveOutcome::Rejected(Rejection::NoPiece);
        };
        if piece.id != id || piece.position != src {
            return MoveOutcome::Rejected(Rejection::Stale);
        }
        if self.is_frozen(piece) {
            return MoveOutcome::Rejected(Rejection::Frozen);
        }
        if !self.base_moves_of(piece).contains(&dst) {
            return MoveOutcome::Rejected(Rejection::Illegal);
        }

        let en_passant_victim = if piece.kind == PieceKind::Pawn {
            self.en_passant_targets(piece)
                .find(|&(landing, _)| landing == dst)
                .map(|(_, victim)| victim)
        } else {
            None
        };
        let castle_dir = (piece.kind == PieceKind::King && (dst.x - src.x).abs() >= 2 && dst.y == src.y)
            .then(|| (dst.x - src.x).signum());

        let Some(mut moving) = self.board.remove(src) else {
            return MoveOutcome::Rejected(Rejection::NoPiece);
        };
        let tick = self.tick;
        moving.last_position = Some(src);
        moving.last_move_tick = Some(tick);
        moving.position = dst;
        moving.freeze_until = tick + moving.kind.freeze_time(&self.config);

        let mut report = MoveReport {
            piece: moving.id,
            kind: moving.kind,
            player: moving.player,
            from: src,
            to: dst,
            captured: None,
            castled_rook: None,
            en_passant: en_passant_victim,
            promoted_to: None,
            kings_captured: SmallVec::new(),
        };

        let victim_square = en_passant_victim.unwrap_or(dst);
        if let Some(victim) = self.board.remove(victim_square) {
            self.kill(&victim, &mut report);
            report.captured = Some(victim);
        }

        if let Some(dir) = castle_dir {
            report.castled_rook = self.castle_rook(dst, dir, tick);
        }

        let player = moving.player;
        let promotes = moving.kind == PieceKind::Pawn && dst.y == promotion_row(&moving, self.board.height());
        self.board.insert(moving);
        if promotes {
            report.promoted_to = Some(self.promote(dst, tick));
        }
        self.player_freeze
            .insert(player, tick + self.config.player_freeze_time);

        trace!(%src, %dst, kind = %report.kind, tick = %tick, "piece moved");
        MoveOutcome::Moved(report)
    }

    /// Slides the Rook beyond `king_dst` to the square the King passed over.
    fn castle_rook(&mut self, king_dst: Coord, dir: i32, tick: Tick) -> Option<(Coord, Coord)> {
        let mut c = king_dst.offset(dir, 0);
        while self.board.in_bounds(c) && !self.board.is_occupied(c) {
            c = c.offset(dir, 0);
        }
        let mut rook = self.board.remove(c)?;
        let rook_dst = king_dst.offset(-dir, 0);
        rook.last_position = Some(c);
        rook.last_move_tick = Some(tick);
        rook.position = rook_dst;
        rook.freeze_until = tick + rook.kind.freeze_time(&self.config);
        self.board.insert(rook);
        Some((c, rook_dst))
    }

    /// Replaces the pawn on `at` with a Queen that hatches after the egg time.
    fn promote(&mut self, at: Coord, tick: Tick) -> PieceId {
        let id = self.allocate_id();
        if let Some(pawn) = self.board.remove(at) {
            let mut queen = Piece::new(id, PieceKind::Queen, pawn.player, at);
            queen.freeze_until = tick + self.config.egg_time;
            queen.last_move_tick = pawn.last_move_tick;
            queen.last_position = pawn.last_position;
            self.board.insert(queen);
        }
        id
    }

    /// A dead King takes its whole army with it.
    fn kill(&mut self, victim: &Piece, report: &mut MoveReport) {
        if victim.kind == PieceKind::King {
            let fallen = self.board.remove_army(victim.player);
            trace!(player = %victim.player, pieces = fallen.len(), "king captured, army removed");
            report.kings_captured.push(victim.player);
        }
    }

    /// Deterministic checksum of the board and the freeze map.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DeterministicHasher::new();
        self.board.hash_into(&mut hasher);
        for (player, until) in &self.player_freeze {
            player.hash(&mut hasher);
            until.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// `(start row, forward step)` for a pawn's side.
const fn pawn_direction(pawn: &Piece) -> (i32, i32) {
    if pawn.side() == 1 {
        (6, -1)
    } else {
        (1, 1)
    }
}

fn promotion_row(pawn: &Piece, height: i32) -> i32 {
    if pawn.side() == 1 {
        0
    } else {
        height - 1
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

    fn dev_game() -> Game {
        Game::empty(RuleConfig::dev())
    }

    const WHITE: Player = Player::new(0);
    const BLACK: Player = Player::new(1);

    #[test]
    fn rook_stops_before_ally_and_on_enemy() {
        let mut game = dev_game();
        game.place(PieceKind::Rook, WHITE, Coord::new(0, 0));
        game.place(PieceKind::Pawn, WHITE, Coord::new(0, 3));
        game.place(PieceKind::Knight, BLACK, Coord::new(2, 0));
        let mut moves = game.moves(Coord::new(0, 0));
        moves.sort();
        assert_eq!(
            moves,
            vec![Coord::new(0, 1), Coord::new(0, 2), Coord::new(1, 0), Coord::new(2, 0)]
        );
    }

    #[test]
    fn pawn_double_step_blocked_by_piece_in_front() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(4, 1));
        game.place(PieceKind::Knight, BLACK, Coord::new(4, 2));
        assert!(game.moves(Coord::new(4, 1)).is_empty());
    }

    #[test]
    fn pawn_double_step_truncated_at_second_square() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, BLACK, Coord::new(4, 6));
        game.place(PieceKind::Knight, WHITE, Coord::new(4, 4));
        assert_eq!(game.moves(Coord::new(4, 6)), vec![Coord::new(4, 5)]);
    }

    #[test]
    fn pawn_captures_only_diagonally_onto_enemies() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(4, 3));
        game.place(PieceKind::Pawn, BLACK, Coord::new(5, 4));
        game.place(PieceKind::Pawn, WHITE, Coord::new(3, 4));
        let mut moves = game.moves(Coord::new(4, 3));
        moves.sort();
        assert_eq!(moves, vec![Coord::new(4, 4), Coord::new(5, 4)]);
    }

    #[test]
    fn pawn_sight_includes_empty_diagonals() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(0, 2));
        let sight = game.sight(Coord::new(0, 2));
        assert!(sight.contains(&Coord::new(1, 3)));
        assert!(sight.contains(&Coord::new(0, 3)));
        assert_eq!(sight.len(), 2);
    }

    #[test]
    fn king_sight_reports_attackers() {
        let mut game = dev_game();
        game.place(PieceKind::King, WHITE, Coord::new(3, 0));
        game.place(PieceKind::Knight, BLACK, Coord::new(4, 2));
        game.place(PieceKind::Rook, BLACK, Coord::new(7, 0));
        game.place(PieceKind::Bishop, BLACK, Coord::new(3, 5));
        let sight = game.sight(Coord::new(3, 0));
        assert!(sight.contains(&Coord::new(4, 2)));
        assert!(sight.contains(&Coord::new(7, 0)));
        assert!(!sight.contains(&Coord::new(3, 5)));
    }

    #[test]
    fn frozen_piece_has_no_moves_until_freeze_ends() {
        let mut game = Game::empty(RuleConfig::standard());
        game.place(PieceKind::Knight, WHITE, Coord::new(1, 0));
        game.set_tick(Tick::new(100));
        assert!(game.move_piece(Coord::new(1, 0), Coord::new(2, 2)).is_moved());
        game.set_tick(Tick::new(179));
        assert!(game.moves(Coord::new(2, 2)).is_empty());
        game.set_tick(Tick::new(180));
        assert!(!game.moves(Coord::new(2, 2)).is_empty());
    }

    #[test]
    fn player_freeze_blocks_other_pieces() {
        let mut game = Game::empty(RuleConfig::standard());
        game.place(PieceKind::Knight, WHITE, Coord::new(1, 0));
        game.place(PieceKind::Knight, WHITE, Coord::new(6, 0));
        game.set_tick(Tick::new(10));
        assert!(game.move_piece(Coord::new(1, 0), Coord::new(2, 2)).is_moved());
        assert_eq!(game.player_freeze(WHITE), Tick::new(30));
        assert_eq!(
            game.move_piece(Coord::new(6, 0), Coord::new(5, 2)),
            MoveOutcome::Rejected(Rejection::Frozen)
        );
        game.set_tick(Tick::new(30));
        assert!(game.move_piece(Coord::new(6, 0), Coord::new(5, 2)).is_moved());
    }

    #[test]
    fn illegal_destination_is_a_no_op() {
        let mut game = Game::new(RuleConfig::dev());
        let before = game.checksum();
        assert_eq!(
            game.move_piece(Coord::new(0, 0), Coord::new(0, 5)),
            MoveOutcome::Rejected(Rejection::Illegal)
        );
        assert_eq!(
            game.move_piece(Coord::new(4, 4), Coord::new(4, 5)),
            MoveOutcome::Rejected(Rejection::NoPiece)
        );
        assert_eq!(game.checksum(), before);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut game = dev_game();
        let knight = game.place(PieceKind::Knight, WHITE, Coord::new(1, 0));
        game.place(PieceKind::Bishop, BLACK, Coord::new(2, 2));
        let rook = game.place(PieceKind::Rook, BLACK, Coord::new(1, 7));
        assert!(game.move_piece(Coord::new(1, 7), Coord::new(1, 0)).is_moved());
        assert_eq!(
            game.move_piece_by_id(knight, Coord::new(2, 2)),
            MoveOutcome::Rejected(Rejection::Stale)
        );
        assert_eq!(game.board().get(Coord::new(1, 0)).unwrap().id, rook);
    }

    #[test]
    fn castling_moves_rook_beside_king() {
        let mut game = dev_game();
        game.place(PieceKind::King, WHITE, Coord::new(4, 0));
        game.place(PieceKind::Rook, WHITE, Coord::new(7, 0));
        assert!(game.moves(Coord::new(4, 0)).contains(&Coord::new(6, 0)));

        let MoveOutcome::Moved(report) = game.move_piece(Coord::new(4, 0), Coord::new(6, 0)) else {
            panic!("castle rejected");
        };
        assert_eq!(report.castled_rook, Some((Coord::new(7, 0), Coord::new(5, 0))));
        assert_eq!(game.board().get(Coord::new(6, 0)).unwrap().kind, PieceKind::King);
        assert_eq!(game.board().get(Coord::new(5, 0)).unwrap().kind, PieceKind::Rook);
        assert!(game.board().get(Coord::new(7, 0)).is_none());
    }

    #[test]
    fn no_castling_after_rook_moved() {
        let mut game = dev_game();
        game.place(PieceKind::King, WHITE, Coord::new(4, 0));
        game.place(PieceKind::Rook, WHITE, Coord::new(7, 0));
        assert!(game.move_piece(Coord::new(7, 0), Coord::new(7, 1)).is_moved());
        game.set_tick(Tick::new(100));
        assert!(game.move_piece(Coord::new(7, 1), Coord::new(7, 0)).is_moved());
        assert!(!game.moves(Coord::new(4, 0)).contains(&Coord::new(6, 0)));
    }

    #[test]
    fn no_castling_through_pieces() {
        let mut game = dev_game();
        game.place(PieceKind::King, WHITE, Coord::new(4, 0));
        game.place(PieceKind::Bishop, WHITE, Coord::new(5, 0));
        game.place(PieceKind::Rook, WHITE, Coord::new(7, 0));
        assert!(!game.moves(Coord::new(4, 0)).contains(&Coord::new(6, 0)));
    }

    #[test]
    fn queenside_castle_from_opening_king_square() {
        let mut game = dev_game();
        game.place(PieceKind::King, WHITE, Coord::new(3, 0));
        game.place(PieceKind::Rook, WHITE, Coord::new(0, 0));
        let MoveOutcome::Moved(report) = game.move_piece(Coord::new(3, 0), Coord::new(1, 0)) else {
            panic!("castle rejected");
        };
        assert_eq!(report.castled_rook, Some((Coord::new(0, 0), Coord::new(2, 0))));
    }

    #[test]
    fn en_passant_removes_passing_pawn() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(4, 4));
        game.place(PieceKind::Pawn, BLACK, Coord::new(5, 6));
        game.set_tick(Tick::new(20));
        assert!(game.move_piece(Coord::new(5, 6), Coord::new(5, 4)).is_moved());

        game.set_tick(Tick::new(21));
        assert!(game.moves(Coord::new(4, 4)).contains(&Coord::new(5, 5)));
        let MoveOutcome::Moved(report) = game.move_piece(Coord::new(4, 4), Coord::new(5, 5)) else {
            panic!("en passant rejected");
        };
        assert_eq!(report.en_passant, Some(Coord::new(5, 4)));
        assert_eq!(report.captured.map(|p| p.kind), Some(PieceKind::Pawn));
        assert!(game.board().get(Coord::new(5, 4)).is_none());
    }

    #[test]
    fn en_passant_window_closes() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(4, 4));
        game.place(PieceKind::Pawn, BLACK, Coord::new(5, 6));
        game.set_tick(Tick::new(20));
        assert!(game.move_piece(Coord::new(5, 6), Coord::new(5, 4)).is_moved());
        game.set_tick(Tick::new(22));
        assert!(!game.moves(Coord::new(4, 4)).contains(&Coord::new(5, 5)));
    }

    #[test]
    fn promotion_spawns_frozen_queen() {
        let mut game = dev_game();
        game.place(PieceKind::Pawn, WHITE, Coord::new(2, 6));
        game.set_tick(Tick::new(50));
        let MoveOutcome::Moved(report) = game.move_piece(Coord::new(2, 6), Coord::new(2, 7)) else {
            panic!("promotion rejected");
        };
        assert!(report.promoted_to.is_some());
        let queen = game.board().get(Coord::new(2, 7)).unwrap();
        assert_eq!(queen.kind, PieceKind::Queen);
        assert_eq!(queen.freeze_until, Tick::new(110));
    }

    #[test]
    fn king_capture_removes_army() {
        let mut game = Game::new(RuleConfig::dev());
        game.place(PieceKind::Rook, BLACK, Coord::new(3, 2));
        // open the file between the rook and the white king
        game.board = {
            let mut board = game.board.clone();
            board.remove(Coord::new(3, 1));
            board
        };
        let MoveOutcome::Moved(report) = game.move_piece(Coord::new(3, 2), Coord::new(3, 0)) else {
            panic!("capture rejected");
        };
        assert_eq!(report.kings_captured.as_slice(), &[WHITE]);
        assert_eq!(game.board().pieces_of(WHITE).count(), 0);
        assert_eq!(game.board().pieces_of(BLACK).count(), 17);
    }

    #[test]
    fn reset_restores_layout_and_clears_freezes() {
        let mut game = Game::new(RuleConfig::standard());
        assert!(game.move_piece(Coord::new(1, 0), Coord::new(2, 2)).is_moved());
        game.reset(Some(2));
        assert_eq!(game.board().len(), 64);
        assert_eq!(game.player_freeze(WHITE), Tick::ZERO);
        assert_eq!(game.num_players(), 4);
    }
}
