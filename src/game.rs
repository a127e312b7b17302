use crate::config::BoardConfig;
use crate::error::{Result, SnakeError};
use crate::pos::Pos;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// An episode times out once the frame count exceeds this many frames per segment.
pub const TIMEOUT_FRAMES_PER_SEGMENT: usize = 100;

pub const COLLISION_REWARD: f32 = -10.0;
pub const TIMEOUT_REWARD: f32 = -10.0;
pub const FOOD_REWARD: f32 = 10.0;
/// Charged on every non-terminal, non-eating step.
pub const IDLE_PENALTY: f32 = -1.0;

/// Absolute heading, in the cyclic order used by turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dir {
    Left = 0,
    Up = 1,
    Right = 2,
    Down = 3,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::Left, Dir::Up, Dir::Right, Dir::Down];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Wraps modulo 4.
    pub fn from_index(i: usize) -> Dir {
        Dir::ALL[i % 4]
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::Left => (-1, 0),
            Dir::Up => (0, -1),
            Dir::Right => (1, 0),
            Dir::Down => (0, 1),
        }
    }
}

impl TryFrom<u8> for Dir {
    type Error = SnakeError;

    fn try_from(v: u8) -> Result<Self> {
        Dir::ALL.get(v as usize).copied().ok_or(SnakeError::InvalidDirection(v))
    }
}

/// Move relative to the current heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    TurnLeft = 0,
    Forward = 1,
    TurnRight = 2,
}

pub const ACTIONS: usize = 3;

impl Action {
    pub const ALL: [Action; ACTIONS] = [Action::TurnLeft, Action::Forward, Action::TurnRight];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Action {
    type Error = SnakeError;

    fn try_from(v: u8) -> Result<Self> {
        Action::ALL.get(v as usize).copied().ok_or(SnakeError::InvalidAction(v))
    }
}

/// Heading after applying `action`: (current + action - 1) mod 4.
pub fn compute_new_direction(current: Dir, action: Action) -> Dir {
    Dir::from_index(current.index() + action.index() + 3)
}

/// Maps an absolute key direction onto a relative action. Only quarter turns
/// are meaningful; the current heading and its reverse both mean "keep going".
pub fn relative_action_for(current: Dir, input: Dir) -> Action {
    match (input.index() + 4 - current.index()) % 4 {
        1 => Action::TurnRight,
        3 => Action::TurnLeft,
        _ => Action::Forward,
    }
}

/// The 11 observation flags packed into a bitfield, which doubles as the
/// q-table key.
///
/// Layout, low bit first:
/// - bits 0..4: heading one-hot `[left, up, right, down]`
/// - bits 4..8: food relative to the head `[left, forward, right, behind]`
/// - bits 8..11: danger when `[turning left, going forward, turning right]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateVector(u16);

impl StateVector {
    pub const LEN: usize = 11;
    const MASK: u16 = (1 << Self::LEN) - 1;

    pub fn from_flags(flags: [bool; Self::LEN]) -> Self {
        let bits = flags.iter().enumerate().fold(0u16, |k, (i, &f)| if f { k | 1 << i } else { k });
        StateVector(bits)
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        (bits & !Self::MASK == 0).then_some(StateVector(bits))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn get(self, i: usize) -> bool {
        i < Self::LEN && self.0 >> i & 1 == 1
    }

    pub fn flags(self) -> [bool; Self::LEN] {
        std::array::from_fn(|i| self.get(i))
    }

    pub fn direction(self) -> [bool; 4] {
        std::array::from_fn(|i| self.get(i))
    }

    pub fn food(self) -> [bool; 4] {
        std::array::from_fn(|i| self.get(4 + i))
    }

    pub fn danger(self) -> [bool; 3] {
        std::array::from_fn(|i| self.get(8 + i))
    }
}

/// Result of one `Game::step`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub state: StateVector,
    pub reward: f32,
    pub done: bool,
}

/// The snake environment. State changes only through `reset` and `step`.
pub struct Game {
    width: u16,
    height: u16,
    snake: VecDeque<Pos>,
    dir: Dir,
    food: Pos,
    frame: u32,
    score: u32,
    done: bool,
    rng: SmallRng,
}

impl Game {
    /// Builds a game and immediately resets it.
    pub fn new(board: BoardConfig, rng: SmallRng) -> Result<Self> {
        board.validate()?;
        let mut g = Self {
            width: board.width,
            height: board.height,
            snake: VecDeque::new(),
            dir: Dir::Right,
            food: Pos::new(0, 0),
            frame: 0,
            score: 0,
            done: false,
            rng,
        };
        g.reset();
        Ok(g)
    }

    pub fn with_seed(board: BoardConfig, seed: u64) -> Result<Self> {
        Self::new(board, SmallRng::seed_from_u64(seed))
    }

    pub fn from_entropy(board: BoardConfig) -> Result<Self> {
        Self::new(board, SmallRng::from_entropy())
    }

    /// Builds a game from an explicit layout (head first). Frame and score
    /// start at zero. Useful for replaying positions and scenario tests.
    pub fn with_layout(board: BoardConfig, snake: &[Pos], dir: Dir, food: Pos, seed: u64) -> Result<Self> {
        let mut g = Self::with_seed(board, seed)?;
        if !snake.is_empty() {
            g.snake = snake.iter().copied().collect();
        }
        g.dir = dir;
        g.food = food;
        Ok(g)
    }

    /// Starts a new episode: one head segment at the board center, random
    /// heading, fresh food.
    pub fn reset(&mut self) -> StateVector {
        let center = Pos::new((self.width / 2) as i32, (self.height / 2) as i32);
        self.snake.clear();
        self.snake.push_back(center);
        self.dir = Dir::from_index(self.rng.gen_range(0..4));
        self.place_food();
        self.frame = 0;
        self.score = 0;
        self.done = false;
        self.state()
    }

    /// Rejection-samples a free cell. Returns false when the snake covers
    /// the whole board, leaving the food where it was.
    fn place_food(&mut self) -> bool {
        if self.snake.len() >= self.width as usize * self.height as usize {
            return false;
        }
        loop {
            let x = self.rng.gen_range(0..self.width as i32);
            let y = self.rng.gen_range(0..self.height as i32);
            let p = Pos::new(x, y);
            if !self.snake_contains(p) {
                self.food = p;
                return true;
            }
        }
    }

    pub fn snake_contains(&self, p: Pos) -> bool {
        self.snake.iter().any(|&s| s == p)
    }

    pub fn head(&self) -> Pos {
        // never empty: reset and with_layout both leave at least one segment
        self.snake.front().copied().unwrap_or(Pos::new(0, 0))
    }

    fn collides(&self, p: Pos) -> bool {
        !p.in_bounds(self.width, self.height) || self.snake.iter().skip(1).any(|&s| s == p)
    }

    pub fn step(&mut self, action: Action) -> Step {
        if self.done {
            return Step { state: self.state(), reward: 0.0, done: true };
        }

        let prev_head = self.head();
        self.dir = compute_new_direction(self.dir, action);
        let head = prev_head.offset(self.dir.delta());

        self.snake.push_front(head);
        let ate = head == self.food;
        let mut board_full = false;
        if ate {
            self.score += 1;
            board_full = !self.place_food();
        } else {
            self.snake.pop_back();
        }

        self.frame += 1;

        let timeout = self.frame as usize > TIMEOUT_FRAMES_PER_SEGMENT * self.snake.len();
        let collision = self.collides(head);
        self.done = timeout || collision || board_full;

        let reward = if timeout {
            TIMEOUT_REWARD
        } else if collision {
            COLLISION_REWARD
        } else if ate {
            FOOD_REWARD
        } else {
            let progress = prev_head.manhattan(self.food) - head.manhattan(self.food);
            progress as f32 + IDLE_PENALTY
        };

        Step { state: self.state(), reward, done: self.done }
    }

    pub fn state(&self) -> StateVector {
        let mut flags = [false; StateVector::LEN];
        flags[self.dir.index()] = true;
        flags[4..8].copy_from_slice(&self.food_flags());
        for a in Action::ALL {
            let next = self.head().offset(compute_new_direction(self.dir, a).delta());
            flags[8 + a.index()] = self.collides(next);
        }
        StateVector::from_flags(flags)
    }

    /// Food position in the snake's own frame: `[left, forward, right, behind]`.
    fn food_flags(&self) -> [bool; 4] {
        let head = self.head();
        let (dx, dy) = (self.food.x - head.x, self.food.y - head.y);
        // lateral > 0 is to the snake's right
        let (lateral, forward) = match self.dir {
            Dir::Left => (-dy, -dx),
            Dir::Up => (dx, -dy),
            Dir::Right => (dy, dx),
            Dir::Down => (-dx, dy),
        };
        [lateral < 0, forward > 0, lateral > 0, forward < 0]
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn elapsed_frames(&self) -> u32 {
        self.frame
    }

    pub fn direction(&self) -> Dir {
        self.dir
    }

    pub fn food(&self) -> Pos {
        self.food
    }

    pub fn snake(&self) -> &VecDeque<Pos> {
        &self.snake
    }

    pub fn board(&self) -> BoardConfig {
        BoardConfig::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board10() -> BoardConfig {
        BoardConfig::new(10, 10)
    }

    #[test]
    fn new_direction_follows_turns() {
        for d in Dir::ALL {
            assert_eq!(compute_new_direction(d, Action::Forward), d);
            assert_eq!(compute_new_direction(d, Action::TurnLeft).index(), (d.index() + 3) % 4);
            assert_eq!(compute_new_direction(d, Action::TurnRight).index(), (d.index() + 1) % 4);
        }
        assert_eq!(compute_new_direction(Dir::Left, Action::TurnLeft), Dir::Down);
        assert_eq!(compute_new_direction(Dir::Down, Action::TurnRight), Dir::Left);
    }

    #[test]
    fn relative_action_defaults_to_forward() {
        assert_eq!(relative_action_for(Dir::Up, Dir::Right), Action::TurnRight);
        assert_eq!(relative_action_for(Dir::Up, Dir::Left), Action::TurnLeft);
        assert_eq!(relative_action_for(Dir::Up, Dir::Up), Action::Forward);
        assert_eq!(relative_action_for(Dir::Up, Dir::Down), Action::Forward);
        assert_eq!(relative_action_for(Dir::Left, Dir::Down), Action::TurnLeft);
    }

    #[test]
    fn raw_indices_are_checked() {
        assert_eq!(Action::try_from(2).unwrap(), Action::TurnRight);
        assert!(matches!(Action::try_from(3), Err(SnakeError::InvalidAction(3))));
        assert_eq!(Dir::try_from(3).unwrap(), Dir::Down);
        assert!(matches!(Dir::try_from(4), Err(SnakeError::InvalidDirection(4))));
    }

    #[test]
    fn reset_places_head_at_center() {
        let mut g = Game::with_seed(board10(), 1).unwrap();
        g.reset();
        assert_eq!(g.snake().len(), 1);
        assert_eq!(g.head(), Pos::new(5, 5));
        assert_ne!(g.food(), g.head());
        assert_eq!(g.elapsed_frames(), 0);
        assert_eq!(g.score(), 0);
        assert!(!g.is_done());
    }

    #[test]
    fn eating_scores_and_grows() {
        let mut g = Game::with_layout(board10(), &[Pos::new(5, 5)], Dir::Right, Pos::new(6, 5), 7).unwrap();
        let step = g.step(Action::Forward);
        assert_eq!(step.reward, 10.0);
        assert!(!step.done);
        assert_eq!(g.score(), 1);
        assert_eq!(g.snake().len(), 2);
        assert!(!g.snake_contains(g.food()));
    }

    #[test]
    fn leaving_the_board_is_a_collision() {
        let mut g = Game::with_layout(board10(), &[Pos::new(9, 5)], Dir::Right, Pos::new(0, 0), 7).unwrap();
        let step = g.step(Action::Forward);
        assert_eq!(g.head(), Pos::new(10, 5));
        assert_eq!(step.reward, -10.0);
        assert!(step.done);
        assert!(g.is_done());
    }

    #[test]
    fn running_into_the_body_is_a_collision() {
        let body = [Pos::new(5, 5), Pos::new(4, 5), Pos::new(4, 4), Pos::new(5, 4), Pos::new(6, 4)];
        let mut g = Game::with_layout(board10(), &body, Dir::Right, Pos::new(0, 9), 7).unwrap();
        let step = g.step(Action::TurnLeft);
        assert_eq!(g.head(), Pos::new(5, 4));
        assert_eq!(step.reward, -10.0);
        assert!(step.done);
    }

    #[test]
    fn moving_into_the_vacated_tail_is_safe() {
        let body = [Pos::new(5, 5), Pos::new(5, 4), Pos::new(4, 4), Pos::new(4, 5)];
        let mut g = Game::with_layout(board10(), &body, Dir::Down, Pos::new(0, 9), 7).unwrap();
        let step = g.step(Action::TurnRight);
        assert_eq!(g.head(), Pos::new(4, 5));
        assert!(!step.done);
    }

    #[test]
    fn timeout_after_hundred_frames_per_segment() {
        let mut g = Game::with_layout(board10(), &[Pos::new(5, 5)], Dir::Right, Pos::new(0, 0), 7).unwrap();
        for _ in 0..100 {
            assert!(!g.step(Action::TurnRight).done);
        }
        let step = g.step(Action::TurnRight);
        assert_eq!(g.elapsed_frames(), 101);
        assert!(step.done);
        assert_eq!(step.reward, -10.0);
    }

    #[test]
    fn shaping_rewards_progress_minus_idle_penalty() {
        let mut toward = Game::with_layout(board10(), &[Pos::new(5, 5)], Dir::Right, Pos::new(8, 5), 7).unwrap();
        assert_eq!(toward.step(Action::Forward).reward, 0.0);

        let mut away = Game::with_layout(board10(), &[Pos::new(5, 5)], Dir::Left, Pos::new(8, 5), 7).unwrap();
        assert_eq!(away.step(Action::Forward).reward, -2.0);

        let mut sideways = Game::with_layout(board10(), &[Pos::new(5, 5)], Dir::Up, Pos::new(5, 8), 7).unwrap();
        assert_eq!(sideways.step(Action::TurnRight).reward, -2.0);
    }

    #[test]
    fn stepping_a_finished_game_is_a_read() {
        let mut g = Game::with_layout(board10(), &[Pos::new(9, 5)], Dir::Right, Pos::new(0, 0), 7).unwrap();
        g.step(Action::Forward);
        let frames = g.elapsed_frames();
        let again = g.step(Action::TurnLeft);
        assert_eq!(again.reward, 0.0);
        assert!(again.done);
        assert_eq!(g.elapsed_frames(), frames);
        assert_eq!(g.direction(), Dir::Right);
    }

    #[test]
    fn filling_the_board_ends_the_episode() {
        let board = BoardConfig::new(2, 1);
        let mut g = Game::with_layout(board, &[Pos::new(1, 0)], Dir::Left, Pos::new(0, 0), 7).unwrap();
        let step = g.step(Action::Forward);
        assert_eq!(step.reward, 10.0);
        assert!(step.done);
        assert_eq!(g.score(), 1);
    }

    #[test]
    fn food_only_lands_on_the_free_cell() {
        let mut g = Game::with_seed(BoardConfig::new(2, 1), 3).unwrap();
        for _ in 0..50 {
            g.reset();
            assert_eq!(g.head(), Pos::new(1, 0));
            assert_eq!(g.food(), Pos::new(0, 0));
        }
    }

    #[test]
    fn state_reports_heading_food_and_danger() {
        let g = Game::with_layout(board10(), &[Pos::new(0, 0)], Dir::Up, Pos::new(3, 0), 7).unwrap();
        let s = g.state();
        assert_eq!(s.direction(), [false, true, false, false]);
        // food is to the right of an upward-facing snake, level with the head
        assert_eq!(s.food(), [false, false, true, false]);
        assert_eq!(s.danger(), [true, true, false]);
    }

    #[test]
    fn food_flags_rotate_with_heading() {
        let food = Pos::new(5, 2);
        let cases = [
            (Dir::Up, [false, true, false, false]),
            (Dir::Down, [false, false, false, true]),
            (Dir::Left, [false, false, true, false]),
            (Dir::Right, [true, false, false, false]),
        ];
        for (dir, expected) in cases {
            let g = Game::with_layout(board10(), &[Pos::new(5, 5)], dir, food, 7).unwrap();
            assert_eq!(g.state().food(), expected, "heading {dir:?}");
        }
    }

    #[test]
    fn state_bits_round_trip_through_flags() {
        let flags = [true, false, false, false, false, true, true, false, false, false, true];
        let s = StateVector::from_flags(flags);
        assert_eq!(s.flags(), flags);
        assert_eq!(StateVector::from_bits(s.bits()), Some(s));
        assert_eq!(StateVector::from_bits(1 << 11), None);
    }
}
