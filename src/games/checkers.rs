//! Checkers on a square board.
//!
//! The server state holds the board (`board`, rows of one-character strings), the side to
//! play (`player`, `"r"` or `"a"`), the last move and the game status. Men are lowercase,
//! kings uppercase, empty squares are a space.

use anyhow::{bail, ensure, Context};
use rand::{rngs::StdRng, seq::IndexedRandom, SeedableRng};
use serde_json::{json, Value};

use crate::{action::Action, agent::Agent};

/// Game type name used by the server and the updater registry.
pub const GAME_TYPE: &str = "checkers";

const EMPTY: char = ' ';
const TERMINAL_STATUSES: [&str; 3] = ["lost", "won", "draw"];

// forward directions first, men only use those two
const A_DIRECTIONS: [(isize, isize); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const R_DIRECTIONS: [(isize, isize); 4] = [(1, -1), (1, 1), (-1, -1), (-1, 1)];

/// A move: the squares visited by one piece, starting square first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckersAction {
    path: Vec<[usize; 2]>,
}

impl CheckersAction {
    /// A move along `path`. It needs a start and at least one destination.
    pub fn new(path: Vec<[usize; 2]>) -> anyhow::Result<CheckersAction> {
        ensure!(path.len() >= 2, "a move visits at least two squares");
        Ok(CheckersAction { path })
    }

    /// Visited squares as `[row, column]`.
    pub fn path(&self) -> &[[usize; 2]] {
        &self.path
    }

    /// Whether the move captures pieces.
    pub fn is_jump(&self) -> bool {
        self.path
            .windows(2)
            .any(|step| step[0][0].abs_diff(step[1][0]) == 2)
    }
}

impl Action for CheckersAction {
    fn encode(&self) -> Value {
        json!({ "move": self.path })
    }

    fn decode(payload: &Value) -> anyhow::Result<Self> {
        let squares = payload
            .get("move")
            .and_then(Value::as_array)
            .context("a move must be a list of squares")?;
        let path = squares
            .iter()
            .map(|square| {
                let coordinate = |index: usize| {
                    square
                        .get(index)
                        .and_then(Value::as_u64)
                        .map(|value| value as usize)
                        .with_context(|| format!("invalid square {square}"))
                };
                Ok([coordinate(0)?, coordinate(1)?])
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        CheckersAction::new(path)
    }

    fn all() -> Vec<Self> {
        Vec::new()
    }
}

/// A board position and the side to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckersBoard {
    cells: Vec<Vec<char>>,
    current_player: char,
}

fn opponent(player: char) -> char {
    if player == 'r' {
        'a'
    } else {
        'r'
    }
}

impl CheckersBoard {
    /// Reads the `board` and `player` fields of a server state.
    pub fn from_state(state: &Value) -> anyhow::Result<CheckersBoard> {
        let rows = state
            .get("board")
            .and_then(Value::as_array)
            .context("state has no board")?;
        let cells = rows
            .iter()
            .map(|row| {
                row.as_array()
                    .context("board rows must be lists")?
                    .iter()
                    .map(|cell| match cell.as_str().map(|cell| cell.chars().next()) {
                        Some(Some(piece)) => Ok(piece),
                        Some(None) => Ok(EMPTY),
                        None => bail!("invalid board square {cell}"),
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let current_player = match state.get("player").and_then(Value::as_str) {
            Some("r") => 'r',
            Some("a") => 'a',
            other => bail!("unknown player {other:?}"),
        };
        Ok(CheckersBoard {
            cells,
            current_player,
        })
    }

    /// `'r'` or `'a'`.
    pub fn current_player(&self) -> char {
        self.current_player
    }

    /// Content of a square, `None` off the board.
    pub fn piece_at(&self, x: usize, y: usize) -> Option<char> {
        self.cells.get(x)?.get(y).copied()
    }

    fn is_empty(&self, x: usize, y: usize) -> bool {
        self.piece_at(x, y) == Some(EMPTY)
    }

    fn owns(&self, x: usize, y: usize, player: char) -> bool {
        self.piece_at(x, y)
            .is_some_and(|piece| piece.to_ascii_lowercase() == player)
    }

    fn offset(&self, x: usize, y: usize, (dx, dy): (isize, isize)) -> Option<(usize, usize)> {
        let x = x.checked_add_signed(dx)?;
        let y = y.checked_add_signed(dy)?;
        self.piece_at(x, y).map(|_| (x, y))
    }

    fn directions(&self, x: usize, y: usize, player: char) -> &'static [(isize, isize)] {
        let is_king = self.piece_at(x, y).is_some_and(|piece| piece.is_ascii_uppercase());
        let all: &'static [(isize, isize); 4] = if player == 'a' {
            &A_DIRECTIONS
        } else {
            &R_DIRECTIONS
        };
        if is_king {
            all
        } else {
            &all[..2]
        }
    }

    /// Legal moves of the side to play. Captures are mandatory: when a jump exists only jump
    /// sequences are returned.
    pub fn possible_moves(&self) -> Vec<CheckersAction> {
        let jumps = self.possible_jumps();
        if !jumps.is_empty() {
            return jumps;
        }

        let player = self.current_player;
        let mut moves = Vec::new();
        for (x, row) in self.cells.iter().enumerate() {
            for y in 0..row.len() {
                if !self.owns(x, y, player) {
                    continue;
                }
                for &delta in self.directions(x, y, player) {
                    if let Some((nx, ny)) = self.offset(x, y, delta) {
                        if self.is_empty(nx, ny) {
                            moves.push(CheckersAction {
                                path: vec![[x, y], [nx, ny]],
                            });
                        }
                    }
                }
            }
        }
        moves
    }

    fn possible_jumps(&self) -> Vec<CheckersAction> {
        let player = self.current_player;
        let mut jumps = Vec::new();
        for (x, row) in self.cells.iter().enumerate() {
            for y in 0..row.len() {
                if self.owns(x, y, player) {
                    self.extend_jumps(&mut vec![[x, y]], player, &mut jumps);
                }
            }
        }
        jumps
    }

    /// Follows every capture chain starting at the last square of `path`.
    fn extend_jumps(&self, path: &mut Vec<[usize; 2]>, player: char, out: &mut Vec<CheckersAction>) {
        let Some(&[x, y]) = path.last() else {
            return;
        };
        let landings = self.jump_landings(x, y, player);
        if landings.is_empty() {
            if path.len() > 1 {
                out.push(CheckersAction { path: path.clone() });
            }
            return;
        }
        for landing in landings {
            let next = self.with_step([x, y], landing);
            path.push(landing);
            next.extend_jumps(path, player, out);
            path.pop();
        }
    }

    fn jump_landings(&self, x: usize, y: usize, player: char) -> Vec<[usize; 2]> {
        if !self.owns(x, y, player) {
            return Vec::new();
        }
        self.directions(x, y, player)
            .iter()
            .filter_map(|&(dx, dy)| {
                let (mx, my) = self.offset(x, y, (dx, dy))?;
                if !self.owns(mx, my, opponent(player)) {
                    return None;
                }
                let (lx, ly) = self.offset(mx, my, (dx, dy))?;
                self.is_empty(lx, ly).then_some([lx, ly])
            })
            .collect()
    }

    /// Moves the piece on `from` to `to`, capturing and crowning as needed. The side to play
    /// does not change.
    fn with_step(&self, from: [usize; 2], to: [usize; 2]) -> CheckersBoard {
        let mut board = self.clone();
        let [fx, fy] = from;
        let [tx, ty] = to;
        let mut piece = board.cells[fx][fy];
        board.cells[fx][fy] = EMPTY;
        let last_row = board.cells.len() - 1;
        if (tx == last_row && piece == 'r') || (tx == 0 && piece == 'a') {
            piece = piece.to_ascii_uppercase();
        }
        board.cells[tx][ty] = piece;
        if fx.abs_diff(tx) == 2 {
            board.cells[(fx + tx) / 2][(fy + ty) / 2] = EMPTY;
        }
        board
    }

    /// The position after `action`, with the other side to play.
    ///
    /// Fails if the move does not start on a piece of the side to play, or if one of its
    /// steps is not a diagonal step or jump onto a free square of the board.
    pub fn make_move(&self, action: &CheckersAction) -> anyhow::Result<CheckersBoard> {
        let [start, ..] = action.path.as_slice() else {
            bail!("empty move");
        };
        ensure!(
            self.owns(start[0], start[1], self.current_player),
            "no piece of '{}' on {start:?}",
            self.current_player
        );
        let mut board = self.clone();
        for step in action.path.windows(2) {
            let (from, to) = (step[0], step[1]);
            ensure!(board.is_empty(to[0], to[1]), "{to:?} is not a free square of the board");
            let (dx, dy) = (from[0].abs_diff(to[0]), from[1].abs_diff(to[1]));
            ensure!(dx == dy && (dx == 1 || dx == 2), "{from:?} to {to:?} is not a diagonal step");
            board = board.with_step(from, to);
        }
        board.current_player = opponent(self.current_player);
        Ok(board)
    }
}

/// Plays a random legal move for the side to play.
pub struct RandomBot {
    rng: StdRng,
    state: Value,
}

impl RandomBot {
    /// A bot whose choices are drawn from `seed`.
    pub fn new(seed: u64) -> RandomBot {
        RandomBot {
            rng: StdRng::seed_from_u64(seed),
            state: Value::Null,
        }
    }
}

impl Agent for RandomBot {
    type Action = CheckersAction;

    fn choose_action(&mut self) -> Option<CheckersAction> {
        let board = CheckersBoard::from_state(&self.state).ok()?;
        board.possible_moves().choose(&mut self.rng).cloned()
    }

    fn handle_new_state(&mut self, state: Value) {
        self.state = state;
    }

    fn is_done(&self) -> bool {
        self.state
            .get("game_status")
            .and_then(Value::as_str)
            .is_some_and(|status| TERMINAL_STATUSES.contains(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(rows: &[&str], player: &str) -> Value {
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.chars().map(String::from).collect())
            .collect();
        json!({"board": rows, "player": player, "last_move": null, "game_status": "playing"})
    }

    #[test]
    fn move_round_trip() {
        let action = CheckersAction::new(vec![[2, 1], [3, 2]]).unwrap();
        let encoded = action.encode();
        assert_eq!(encoded, json!({"move": [[2, 1], [3, 2]]}));
        assert_eq!(CheckersAction::decode(&encoded).unwrap(), action);
        assert!(CheckersAction::decode(&json!({"move": [[2, 1]]})).is_err());
        assert!(CheckersAction::decode(&json!({"move": [[2, -1], [3, 2]]})).is_err());
    }

    #[test]
    fn men_move_forward_only() {
        let state = board(&["    ", " r  ", "    ", "    "], "r");
        let board = CheckersBoard::from_state(&state).unwrap();
        let mut moves: Vec<_> = board
            .possible_moves()
            .into_iter()
            .map(|action| action.path().to_vec())
            .collect();
        moves.sort();
        assert_eq!(moves, vec![vec![[1, 1], [2, 0]], vec![[1, 1], [2, 2]]]);
    }

    #[test]
    fn kings_move_both_ways() {
        let state = board(&["    ", " R  ", "    ", "    "], "r");
        let board = CheckersBoard::from_state(&state).unwrap();
        assert_eq!(board.possible_moves().len(), 4);
    }

    #[test]
    fn captures_are_mandatory_and_chained() {
        let state = board(
            &[
                "r     ", //
                " a    ",
                "      ",
                "   a  ",
                "      ",
                "      ",
            ],
            "r",
        );
        let board = CheckersBoard::from_state(&state).unwrap();
        let moves = board.possible_moves();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].path(), &[[0, 0], [2, 2], [4, 4]]);
        assert!(moves[0].is_jump());

        let after = board.make_move(&moves[0]).unwrap();
        assert_eq!(after.current_player(), 'a');
        assert_eq!(after.piece_at(1, 1), Some(' '));
        assert_eq!(after.piece_at(3, 3), Some(' '));
        assert_eq!(after.piece_at(4, 4), Some('r'));
    }

    #[test]
    fn reaching_the_last_row_crowns() {
        let state = board(&["    ", "    ", " r  ", "    "], "r");
        let board = CheckersBoard::from_state(&state).unwrap();
        let action = CheckersAction::new(vec![[2, 1], [3, 2]]).unwrap();
        assert_eq!(board.make_move(&action).unwrap().piece_at(3, 2), Some('R'));
    }

    #[test]
    fn moves_off_the_board_are_rejected() {
        let board = CheckersBoard::from_state(&board(&["r ", "  "], "r")).unwrap();
        let action = CheckersAction::decode(&json!({"move": [[5, 5], [6, 6]]})).unwrap();
        assert!(board.make_move(&action).is_err());

        let action = CheckersAction::decode(&json!({"move": [[0, 0], [2, 2]]})).unwrap();
        assert!(board.make_move(&action).is_err());
        let action = CheckersAction::decode(&json!({"move": [[0, 0], [1, 1]]})).unwrap();
        assert_eq!(board.make_move(&action).unwrap().piece_at(1, 1), Some('R'));
    }

    #[test]
    fn random_bot_plays_legal_moves_until_the_game_ends() {
        let mut bot = RandomBot::new(11);
        assert_eq!(bot.choose_action(), None);

        let state = board(&["    ", " a  ", "    ", "    "], "a");
        bot.handle_new_state(state.clone());
        let legal = CheckersBoard::from_state(&state).unwrap().possible_moves();
        let chosen = bot.choose_action().unwrap();
        assert!(legal.contains(&chosen));
        assert!(!bot.is_done());

        bot.handle_new_state(json!({"game_status": "won"}));
        assert!(bot.is_done());
    }
}
