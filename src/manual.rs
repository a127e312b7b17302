use crate::game::{Action, Dir, Game, StateVector, Step, relative_action_for};

/// Keyboard-driven play. Arrow keys arrive as absolute directions and are
/// turned into relative actions against the snake's current heading, so a
/// reverse key press simply keeps the snake going straight.
pub struct ManualGame {
    game: Game,
    pending: Action,
    highest_score: u32,
}

impl ManualGame {
    pub fn new(game: Game) -> Self {
        Self { game, pending: Action::Forward, highest_score: 0 }
    }

    /// Queues a turn for the next tick. The latest input before a tick wins.
    pub fn input(&mut self, dir: Dir) {
        if self.game.is_done() {
            return;
        }
        self.pending = relative_action_for(self.game.direction(), dir);
    }

    /// Advances one frame with the queued action, then falls back to forward.
    pub fn tick(&mut self) -> Step {
        let action = std::mem::replace(&mut self.pending, Action::Forward);
        let step = self.game.step(action);
        if step.done {
            self.highest_score = self.highest_score.max(self.game.score());
        }
        step
    }

    /// Starts a new round, keeping the best score.
    pub fn restart(&mut self) -> StateVector {
        self.highest_score = self.highest_score.max(self.game.score());
        self.pending = Action::Forward;
        self.game.reset()
    }

    pub fn pending(&self) -> Action {
        self.pending
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn highest_score(&self) -> u32 {
        self.highest_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoardConfig;
    use crate::pos::Pos;

    fn layout(dir: Dir, food: Pos) -> ManualGame {
        let game = Game::with_layout(BoardConfig::new(10, 10), &[Pos::new(5, 5)], dir, food, 3).unwrap();
        ManualGame::new(game)
    }

    #[test]
    fn reverse_key_keeps_heading() {
        let mut m = layout(Dir::Up, Pos::new(0, 0));
        m.input(Dir::Down);
        assert_eq!(m.pending(), Action::Forward);
        m.tick();
        assert_eq!(m.game().direction(), Dir::Up);
        assert_eq!(m.game().head(), Pos::new(5, 4));
    }

    #[test]
    fn turn_is_applied_once() {
        let mut m = layout(Dir::Up, Pos::new(0, 0));
        m.input(Dir::Right);
        assert_eq!(m.pending(), Action::TurnRight);
        m.tick();
        assert_eq!(m.game().direction(), Dir::Right);
        assert_eq!(m.pending(), Action::Forward);
        m.tick();
        assert_eq!(m.game().direction(), Dir::Right);
        assert_eq!(m.game().head(), Pos::new(7, 5));
    }

    #[test]
    fn restart_keeps_best_score() {
        let mut m = layout(Dir::Right, Pos::new(6, 5));
        m.tick();
        assert_eq!(m.game().score(), 1);
        let state = m.restart();
        assert_eq!(m.highest_score(), 1);
        assert_eq!(m.game().score(), 0);
        assert_eq!(state, m.game().state());
    }

    #[test]
    fn crash_records_score() {
        let mut m = layout(Dir::Right, Pos::new(6, 5));
        m.tick();
        for _ in 0..10 {
            m.tick();
        }
        assert!(m.game().is_done());
        assert!(m.highest_score() >= 1);
        assert_eq!(m.highest_score(), m.game().score());
    }
}
