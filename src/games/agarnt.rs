//! Agarnt: a blob eats food and smaller blobs on a 2D plane.
//!
//! Actions are the eight compass directions. The server state holds the player (`p`), the
//! other players (`ps`), the food pellets (`f`), the board size (`b`), the time step
//! (`delta`) and a terminal flag (`d`).

use anyhow::{anyhow, Context};
use rand::{rngs::StdRng, seq::IndexedRandom, SeedableRng};
use serde_json::{json, Value};

use crate::{action::Action, agent::Agent};

/// Game type name used by the server and the updater registry.
pub const GAME_TYPE: &str = "agarnt";

/// Direction keys in wire order.
const KEYS: [&str; 4] = ["L", "D", "R", "U"];

/// A move direction: left, down, right, up or a diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgarntAction {
    /// Left.
    L,
    /// Down.
    D,
    /// Right.
    R,
    /// Up.
    U,
    /// Left and down.
    LD,
    /// Left and up.
    LU,
    /// Right and down.
    RD,
    /// Right and up.
    RU,
}

impl AgarntAction {
    /// Every direction.
    pub const ALL: [AgarntAction; 8] = [
        AgarntAction::L,
        AgarntAction::D,
        AgarntAction::R,
        AgarntAction::U,
        AgarntAction::LD,
        AgarntAction::LU,
        AgarntAction::RD,
        AgarntAction::RU,
    ];

    /// Pressed keys, in [`KEYS`] order.
    fn keys(self) -> [bool; 4] {
        use AgarntAction::*;
        // [L, D, R, U]
        match self {
            L => [true, false, false, false],
            D => [false, true, false, false],
            R => [false, false, true, false],
            U => [false, false, false, true],
            LD => [true, true, false, false],
            LU => [true, false, false, true],
            RD => [false, true, true, false],
            RU => [false, false, true, true],
        }
    }

    fn from_keys(keys: [bool; 4]) -> Option<AgarntAction> {
        AgarntAction::ALL
            .into_iter()
            .find(|action| action.keys() == keys)
    }
}

impl Action for AgarntAction {
    fn encode(&self) -> Value {
        let keys = self.keys();
        let directions: serde_json::Map<String, Value> = KEYS
            .iter()
            .zip(keys)
            .map(|(key, pressed)| (key.to_string(), Value::Bool(pressed)))
            .collect();
        json!({ "directions": directions })
    }

    /// Accepts the encoded form, or its bare `directions` object.
    fn decode(payload: &Value) -> anyhow::Result<Self> {
        let directions = payload.get("directions").unwrap_or(payload);
        let directions = directions
            .as_object()
            .context("directions must be a JSON object")?;
        let mut keys = [false; 4];
        for (pressed, key) in keys.iter_mut().zip(KEYS) {
            *pressed = match directions.get(key) {
                Some(value) => value
                    .as_bool()
                    .with_context(|| format!("direction '{key}' is not a boolean"))?,
                None => false,
            };
        }
        AgarntAction::from_keys(keys)
            .ok_or_else(|| anyhow!("{payload} is not a valid direction combination"))
    }

    fn all() -> Vec<Self> {
        AgarntAction::ALL.to_vec()
    }
}

fn is_terminal(state: &Value) -> bool {
    state.get("d").and_then(Value::as_bool).unwrap_or(false)
}

/// Picks a direction uniformly at random.
pub struct RandomAgent {
    rng: StdRng,
    state: Value,
}

impl RandomAgent {
    /// An agent whose choices are drawn from `seed`.
    pub fn new(seed: u64) -> RandomAgent {
        RandomAgent {
            rng: StdRng::seed_from_u64(seed),
            state: Value::Null,
        }
    }
}

impl Agent for RandomAgent {
    type Action = AgarntAction;

    fn choose_action(&mut self) -> Option<AgarntAction> {
        AgarntAction::ALL.choose(&mut self.rng).copied()
    }

    fn handle_new_state(&mut self, state: Value) {
        self.state = state;
    }

    fn is_done(&self) -> bool {
        is_terminal(&self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

impl Point {
    fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Heads for the closest smaller player, or for the closest food when that player is much
/// further away than the food.
pub struct CloseFoodAgent {
    rng: StdRng,
    state: Value,
}

impl CloseFoodAgent {
    /// Above this distance ratio between the closest prey and the closest food, the food wins.
    const PREY_TO_FOOD_RATIO: f64 = 1.5;

    /// `seed` drives the moves made before the first state.
    pub fn new(seed: u64) -> CloseFoodAgent {
        CloseFoodAgent {
            rng: StdRng::seed_from_u64(seed),
            state: Value::Null,
        }
    }

    fn target(&self) -> Option<(Point, Point)> {
        let player = self.state.get("p")?;
        let (me, my_radius) = (blob_position(player)?, player.get("r")?.as_f64()?);

        let closest = |points: &mut dyn Iterator<Item = Point>| {
            points.min_by(|a, b| a.distance(me).total_cmp(&b.distance(me)))
        };
        let prey = closest(
            &mut self
                .state
                .get("ps")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter(|enemy| {
                    enemy
                        .get("r")
                        .and_then(Value::as_f64)
                        .is_some_and(|radius| radius < my_radius)
                })
                .filter_map(blob_position),
        );
        let food = closest(
            &mut self
                .state
                .get("f")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(food_position),
        );

        let target = match (prey, food) {
            (Some(prey), Some(food))
                if prey.distance(me) / food.distance(me) >= Self::PREY_TO_FOOD_RATIO =>
            {
                food
            }
            (Some(prey), _) => prey,
            (None, food) => food?,
        };
        Some((me, target))
    }
}

fn blob_position(blob: &Value) -> Option<Point> {
    Some(Point {
        x: blob.get("x")?.as_f64()?,
        y: blob.get("y")?.as_f64()?,
    })
}

fn food_position(food: &Value) -> Option<Point> {
    Some(Point {
        x: food.get(0)?.as_f64()?,
        y: food.get(1)?.as_f64()?,
    })
}

/// Direction from `me` to `target`. Up when both are at the same place.
fn direction_towards(me: Point, target: Point) -> AgarntAction {
    // [L, D, R, U]
    let mut keys = [false; 4];
    if target.x < me.x {
        keys[0] = true;
    } else if target.x > me.x {
        keys[2] = true;
    }
    if target.y < me.y {
        keys[1] = true;
    } else if target.y > me.y {
        keys[3] = true;
    }
    AgarntAction::from_keys(keys).unwrap_or(AgarntAction::U)
}

impl Agent for CloseFoodAgent {
    type Action = AgarntAction;

    fn choose_action(&mut self) -> Option<AgarntAction> {
        match self.target() {
            Some((me, target)) => Some(direction_towards(me, target)),
            None => AgarntAction::ALL.choose(&mut self.rng).copied(),
        }
    }

    fn handle_new_state(&mut self, state: Value) {
        self.state = state;
    }

    fn is_done(&self) -> bool {
        is_terminal(&self.state)
    }
}

/// A Gaussian bump of the potential field around a player.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bump {
    center: Point,
    height: f64,
    fwhm: f64,
}

/// Height of a Gaussian of full width at half maximum `fwhm`, `distance_sq` away from its
/// center.
fn gaussian(distance_sq: f64, fwhm: f64, height: f64) -> f64 {
    height * (-4.0 * std::f64::consts::LN_2 * distance_sq / (fwhm * fwhm)).exp()
}

/// Speed of a blob: smaller blobs are faster, never slower than 1.
fn velocity(max: f64, radius: f64) -> f64 {
    max - (radius.ln() + 1.0).clamp(0.0, max - 1.0)
}

/// The potential seen by the player: food pulls, bigger players push, smaller players pull
/// from further away.
#[derive(Debug, Clone, PartialEq)]
struct PotentialField {
    board: Point,
    me: Point,
    /// Distance covered in one move, along each axis.
    step: f64,
    foods: Vec<Point>,
    bumps: Vec<Bump>,
}

impl PotentialField {
    const MAX_VELOCITY: f64 = 20.0;
    /// Half side of the square around a food pellet where it pulls.
    const FOOD_REACH: f64 = 20.0;
    const FOOD_FWHM: f64 = 20.0;
    const FOOD_HEIGHT: f64 = -1.0;
    const BIGGER_HEIGHT: f64 = 5.0;
    const SMALLER_HEIGHT: f64 = -5.0;

    fn from_state(state: &Value) -> Option<PotentialField> {
        let board = food_position(state.get("b")?)?;
        let player = state.get("p")?;
        let me = blob_position(player)?;
        let radius = player.get("r")?.as_f64()?;
        let delta = state.get("delta")?.as_f64()?;
        let list = |key: &str| state.get(key).and_then(Value::as_array).into_iter().flatten();

        let foods = list("f").filter_map(food_position).collect();
        let bumps = list("ps")
            .filter_map(|enemy| {
                let center = blob_position(enemy)?;
                let enemy_radius = enemy.get("r")?.as_f64()?;
                Some(if radius <= enemy_radius {
                    Bump {
                        center,
                        height: Self::BIGGER_HEIGHT,
                        fwhm: 2.0 * enemy_radius,
                    }
                } else {
                    Bump {
                        center,
                        height: Self::SMALLER_HEIGHT,
                        fwhm: 15.0 * enemy_radius,
                    }
                })
            })
            .collect();
        Some(PotentialField {
            board,
            me,
            step: velocity(Self::MAX_VELOCITY, radius) * delta + radius,
            foods,
            bumps,
        })
    }

    /// Where one move in `direction` leads. Moved coordinates are rounded up.
    fn next_position(&self, direction: AgarntAction) -> Point {
        // [L, D, R, U]
        let [left, down, right, up] = direction.keys();
        let shift = |coordinate: f64, minus: bool, plus: bool| match (minus, plus) {
            (true, _) => (coordinate - self.step).ceil(),
            (_, true) => (coordinate + self.step).ceil(),
            _ => coordinate,
        };
        Point {
            x: shift(self.me.x, left, right),
            y: shift(self.me.y, down, up),
        }
    }

    /// Potential at `at`, `None` off the board.
    fn potential(&self, at: Point) -> Option<f64> {
        let on_board = (0.0..self.board.x).contains(&at.x) && (0.0..self.board.y).contains(&at.y);
        if !on_board {
            return None;
        }
        let reach = Self::FOOD_REACH;
        let food: f64 = self
            .foods
            .iter()
            .filter(|food| {
                (food.x - reach..food.x + reach).contains(&at.x)
                    && (food.y - reach..food.y + reach).contains(&at.y)
            })
            .map(|food| {
                gaussian(at.distance(*food).powi(2), Self::FOOD_FWHM, Self::FOOD_HEIGHT)
            })
            .sum();
        let players: f64 = self
            .bumps
            .iter()
            .map(|bump| gaussian(at.distance(bump.center).powi(2), bump.fwhm, bump.height))
            .sum();
        Some(food + players)
    }

    /// The direction of lowest potential and that potential. The first direction wins ties.
    fn steepest_descent(&self) -> Option<(AgarntAction, f64)> {
        GradAgent::DIRECTIONS
            .into_iter()
            .filter_map(|direction| {
                let potential = self.potential(self.next_position(direction))?;
                Some((direction, potential))
            })
            .fold(None, |best, (direction, potential)| match best {
                Some((_, lowest)) if lowest <= potential => best,
                _ => Some((direction, potential)),
            })
    }
}

/// Moves down the potential field of the board. Keeps its last direction on flat ground.
pub struct GradAgent {
    rng: StdRng,
    state: Value,
    last_direction: AgarntAction,
}

impl GradAgent {
    /// Scanned in this order.
    const DIRECTIONS: [AgarntAction; 8] = [
        AgarntAction::L,
        AgarntAction::R,
        AgarntAction::U,
        AgarntAction::D,
        AgarntAction::LU,
        AgarntAction::LD,
        AgarntAction::RU,
        AgarntAction::RD,
    ];

    /// `seed` drives the moves made before the first state.
    pub fn new(seed: u64) -> GradAgent {
        GradAgent {
            rng: StdRng::seed_from_u64(seed),
            state: Value::Null,
            last_direction: AgarntAction::L,
        }
    }
}

impl Agent for GradAgent {
    type Action = AgarntAction;

    fn choose_action(&mut self) -> Option<AgarntAction> {
        let Some(field) = PotentialField::from_state(&self.state) else {
            return AgarntAction::ALL.choose(&mut self.rng).copied();
        };
        match field.steepest_descent() {
            Some((direction, potential)) if potential != 0.0 => {
                self.last_direction = direction;
                Some(direction)
            }
            _ => Some(self.last_direction),
        }
    }

    fn handle_new_state(&mut self, state: Value) {
        self.state = state;
    }

    fn is_done(&self) -> bool {
        is_terminal(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn encodes_lu() {
        let encoded = AgarntAction::LU.encode();
        assert_eq!(
            encoded,
            json!({"directions": {"L": true, "D": false, "R": false, "U": true}})
        );
        assert_eq!(AgarntAction::decode(&encoded).unwrap(), AgarntAction::LU);
    }

    #[test]
    fn every_action_has_its_own_encoding() {
        let encodings: HashSet<String> = AgarntAction::all()
            .iter()
            .map(|action| action.encode().to_string())
            .collect();
        assert_eq!(encodings.len(), AgarntAction::ALL.len());
        for action in AgarntAction::all() {
            assert_eq!(AgarntAction::decode(&action.encode()).unwrap(), action);
        }
    }

    #[test]
    fn decodes_bare_directions() {
        let bare = json!({"L": false, "D": true, "R": true, "U": false});
        assert_eq!(AgarntAction::decode(&bare).unwrap(), AgarntAction::RD);
    }

    #[test]
    fn rejects_impossible_combinations() {
        assert!(AgarntAction::decode(&json!({"directions": {"L": true, "R": true}})).is_err());
        assert!(AgarntAction::decode(&json!({"directions": {}})).is_err());
        assert!(AgarntAction::decode(&json!({"directions": {"L": 1}})).is_err());
        assert!(AgarntAction::decode(&json!("L")).is_err());
    }

    #[test]
    fn random_agent_is_done_on_terminal_flag() {
        let mut agent = RandomAgent::new(7);
        assert!(!agent.is_done());
        assert!(agent.choose_action().is_some());
        agent.handle_new_state(json!({"d": false}));
        assert!(!agent.is_done());
        agent.handle_new_state(json!({"d": true}));
        assert!(agent.is_done());
    }

    #[test]
    fn close_food_goes_for_food() {
        let mut agent = CloseFoodAgent::new(0);
        agent.handle_new_state(json!({
            "p": {"x": 10, "y": 10, "r": 5},
            "ps": [],
            "f": [[2, 18], [30, 30]],
        }));
        assert_eq!(agent.choose_action(), Some(AgarntAction::LU));
    }

    #[test]
    fn close_food_prefers_close_prey() {
        let mut agent = CloseFoodAgent::new(0);
        agent.handle_new_state(json!({
            "p": {"x": 10, "y": 10, "r": 5},
            "ps": [{"x": 14, "y": 10, "r": 2}, {"x": 10, "y": 11, "r": 9}],
            "f": [[10, 7]],
        }));
        assert_eq!(agent.choose_action(), Some(AgarntAction::R));
    }

    #[test]
    fn close_food_ignores_distant_prey() {
        let mut agent = CloseFoodAgent::new(0);
        agent.handle_new_state(json!({
            "p": {"x": 0, "y": 0, "r": 5},
            "ps": [{"x": 100, "y": 0, "r": 1}],
            "f": [[0, -3]],
        }));
        assert_eq!(agent.choose_action(), Some(AgarntAction::D));
    }

    #[test]
    fn close_food_without_state_moves_anyway() {
        let mut agent = CloseFoodAgent::new(3);
        assert!(agent.choose_action().is_some());
    }

    fn grad_state(players: Value, foods: Value) -> Value {
        json!({
            "p": {"x": 50, "y": 50, "r": 1},
            "ps": players,
            "f": foods,
            "b": [100, 100],
            "delta": 0.0,
            "d": false,
        })
    }

    #[test]
    fn blob_speed() {
        assert_eq!(velocity(20.0, 1.0), 19.0);
        assert_eq!(velocity(20.0, 1e30), 1.0);
        assert_eq!(velocity(20.0, 0.1), 20.0);
    }

    #[test]
    fn grad_agent_goes_down_to_food() {
        let mut agent = GradAgent::new(0);
        agent.handle_new_state(grad_state(json!([]), json!([[53, 50]])));
        assert_eq!(agent.choose_action(), Some(AgarntAction::R));
    }

    #[test]
    fn grad_agent_flees_bigger_players() {
        let mut agent = GradAgent::new(0);
        agent.handle_new_state(grad_state(json!([{"x": 47, "y": 50, "r": 3}]), json!([])));
        assert_eq!(agent.choose_action(), Some(AgarntAction::RU));
    }

    #[test]
    fn grad_agent_keeps_its_direction_on_flat_ground() {
        let mut agent = GradAgent::new(0);
        agent.handle_new_state(grad_state(json!([]), json!([])));
        assert_eq!(agent.choose_action(), Some(AgarntAction::L));

        agent.handle_new_state(grad_state(json!([]), json!([[50, 46]])));
        assert_eq!(agent.choose_action(), Some(AgarntAction::D));
        agent.handle_new_state(grad_state(json!([]), json!([[90, 90]])));
        assert_eq!(agent.choose_action(), Some(AgarntAction::D));
    }

    #[test]
    fn grad_agent_stays_on_the_board() {
        let mut agent = GradAgent::new(0);
        let mut state = grad_state(json!([]), json!([[-1, 50]]));
        state["p"] = json!({"x": 0, "y": 50, "r": 1});
        agent.handle_new_state(state);
        assert_eq!(agent.choose_action(), Some(AgarntAction::U));
    }

    #[test]
    fn grad_agent_without_state_moves_anyway() {
        let mut agent = GradAgent::new(5);
        assert!(agent.choose_action().is_some());
        assert!(!agent.is_done());
        agent.handle_new_state(json!({"d": true}));
        assert!(agent.is_done());
    }
}
