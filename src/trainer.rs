//! Episode scheduler.
//!
//! A [`Trainer`] owns one [`Session`] (game + agent) and drives it from a
//! single tokio task. The task yields after every step when the throttle is
//! [`Throttle::Slow`] and every `fast_yield_interval` steps when it is
//! [`Throttle::Fast`], so the host stays responsive. Pause, resume and stop
//! are cooperative: the loop observes them between steps and inside the
//! pause wait, never in the middle of a step.
//!
//! # Example
//!
//! ```rust,ignore
//! use snake_qlearn::{SnakeConfig, Trainer};
//!
//! let mut trainer = Trainer::new(&SnakeConfig::default())?;
//! trainer.on_episode(|r| println!("episode {} scored {}", r.episode, r.score));
//! trainer.start()?;
//! let summary = trainer.join().await;
//! ```

use crate::agent::QAgent;
use crate::config::{SnakeConfig, Throttle, TrainerConfig};
use crate::error::{Result, SnakeError};
use crate::game::{Game, StateVector, Step};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Lifecycle of the current training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Emitted once per completed episode. Abandoned episodes are never reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// Zero-based index of the episode that just finished
    pub episode: usize,
    pub score: u32,
    /// Exploration rate after this episode's decay
    pub epsilon: f32,
    pub frames: u32,
    pub highest_score: u32,
}

/// Display snapshot published after every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub run_state: RunState,
    /// Completed episodes in the current run
    pub episode: usize,
    pub score: u32,
    pub done: bool,
    pub state: StateVector,
    pub frames: u32,
    pub epsilon: f32,
    pub highest_score: u32,
    pub throttle: Throttle,
}

impl Status {
    /// True once no run is active: never started, completed or stopped.
    pub fn is_finished(&self) -> bool {
        matches!(self.run_state, RunState::Idle | RunState::Stopped)
    }

    fn observe(&mut self, session: &Session) {
        self.score = session.game.score();
        self.done = session.game.is_done();
        self.state = session.game.state();
        self.frames = session.game.elapsed_frames();
        self.epsilon = session.agent.epsilon();
        self.highest_score = session.highest_score;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The episode limit was reached.
    Completed,
    /// `stop`, `destroy` or a newer `start` cut the run short.
    Cancelled,
}

impl RunOutcome {
    /// Run state published when the loop exits. A `stop` that lands after the
    /// last episode finished still leaves the run `Stopped`.
    fn final_state(self, current: RunState) -> RunState {
        match (self, current) {
            (RunOutcome::Completed, RunState::Stopped) | (RunOutcome::Cancelled, _) => RunState::Stopped,
            (RunOutcome::Completed, _) => RunState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub episodes: usize,
    pub highest_score: u32,
}

// ============================
// Session: one game, one agent
// ============================

/// The game and the agent learning to play it.
pub struct Session {
    game: Game,
    agent: QAgent,
    highest_score: u32,
}

impl Session {
    pub fn new(game: Game, agent: QAgent) -> Self {
        Self { game, agent, highest_score: 0 }
    }

    pub fn from_config(config: &SnakeConfig) -> Result<Self> {
        config.validate()?;
        let (game_rng, agent_rng) = config.rngs();
        let game = Game::new(config.board, game_rng)?;
        Ok(Self::new(game, QAgent::new(config.agent, agent_rng)))
    }

    /// One learning step: choose, act, update.
    pub fn advance(&mut self, state: StateVector) -> Step {
        let action = self.agent.choose_action(state);
        let step = self.game.step(action);
        self.agent.update_q(state, action, step.reward, step.state);
        step
    }

    /// Closes out a finished episode: decays exploration and records the score.
    pub fn finish_episode(&mut self, episode: usize) -> EpisodeReport {
        self.agent.decay_epsilon();
        let score = self.game.score();
        self.highest_score = self.highest_score.max(score);
        EpisodeReport {
            episode,
            score,
            epsilon: self.agent.epsilon(),
            frames: self.game.elapsed_frames(),
            highest_score: self.highest_score,
        }
    }

    /// Plays a whole episode without yielding. Always terminates: every
    /// episode ends by collision or timeout.
    pub fn run_episode(&mut self, episode: usize) -> EpisodeReport {
        let mut state = self.game.reset();
        while !self.game.is_done() {
            state = self.advance(state).state;
        }
        self.finish_episode(episode)
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn agent(&self) -> &QAgent {
        &self.agent
    }

    pub fn highest_score(&self) -> u32 {
        self.highest_score
    }
}

// ============================
// Run control
// ============================

/// Per-run flags. A fresh block is created on every `start`, so a
/// superseded run keeps seeing its own cancellation.
#[derive(Default)]
struct Control {
    cancelled: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

impl Control {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Returns once resumed or cancelled. `notify_one` stores a permit when
    /// nobody is waiting, so a resume that lands before the wait still wakes it.
    async fn wait_resumed(&self) {
        while self.is_paused() && !self.is_cancelled() {
            self.wake.notified().await;
        }
    }
}

type Listener = Box<dyn Fn(&EpisodeReport) + Send + Sync>;

/// State shared between the trainer handle and its run task.
struct Shared {
    throttle: AtomicBool,
    /// Bumped on every `start`; writes from superseded runs are dropped.
    generation: AtomicU64,
    status: watch::Sender<Status>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    fn throttle(&self) -> Throttle {
        if self.throttle.load(Ordering::SeqCst) { Throttle::Fast } else { Throttle::Slow }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, generation: u64, f: impl FnOnce(&mut Status)) {
        self.status.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            f(s);
            true
        });
    }

    fn emit(&self, generation: u64, report: &EpisodeReport) {
        if !self.is_current(generation) {
            return;
        }
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(report);
        }
    }
}

// ============================
// Trainer
// ============================

/// Drives training episodes on a tokio task and exposes lifecycle commands.
///
/// Commands are idempotent and safe from any state: `pause` only acts on a
/// running loop, `resume` only on a paused one, `stop` only on an active run.
pub struct Trainer {
    config: TrainerConfig,
    session: Arc<tokio::sync::Mutex<Session>>,
    shared: Arc<Shared>,
    control: Option<Arc<Control>>,
    task: Option<JoinHandle<RunSummary>>,
    destroyed: bool,
}

impl Trainer {
    pub fn new(config: &SnakeConfig) -> Result<Self> {
        Ok(Self::with_session(config.trainer, Session::from_config(config)?))
    }

    pub fn with_session(config: TrainerConfig, session: Session) -> Self {
        let mut status = Status {
            run_state: RunState::Idle,
            episode: 0,
            score: 0,
            done: false,
            state: StateVector::default(),
            frames: 0,
            epsilon: 0.0,
            highest_score: 0,
            throttle: config.throttle,
        };
        status.observe(&session);
        let (status, _) = watch::channel(status);
        let shared = Shared {
            throttle: AtomicBool::new(config.throttle == Throttle::Fast),
            generation: AtomicU64::new(0),
            status,
            listeners: Mutex::new(Vec::new()),
        };
        Self {
            config,
            session: Arc::new(tokio::sync::Mutex::new(session)),
            shared: Arc::new(shared),
            control: None,
            task: None,
            destroyed: false,
        }
    }

    /// Begins a fresh run from episode 0. A run already in flight is
    /// cancelled; the new one starts once the old one releases the session.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(SnakeError::Destroyed);
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SnakeError::NoRuntime)?;
        if let Some(previous) = self.control.take() {
            previous.cancel();
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let control = Arc::new(Control::default());
        self.shared.publish(generation, |s| {
            s.run_state = RunState::Running;
            s.episode = 0;
        });

        let task = run(
            Arc::clone(&self.session),
            Arc::clone(&self.shared),
            Arc::clone(&control),
            self.config,
            generation,
        );
        self.task = Some(handle.spawn(task));
        self.control = Some(control);
        Ok(())
    }

    pub fn pause(&self) {
        let Some(control) = &self.control else { return };
        let paused = self.shared.status.send_if_modified(|s| {
            if s.run_state != RunState::Running {
                return false;
            }
            s.run_state = RunState::Paused;
            true
        });
        if paused {
            control.paused.store(true, Ordering::SeqCst);
            trace!("training paused");
        }
    }

    pub fn resume(&self) {
        let Some(control) = &self.control else { return };
        if !control.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.status.send_if_modified(|s| {
            if s.run_state != RunState::Paused {
                return false;
            }
            s.run_state = RunState::Running;
            true
        });
        control.wake.notify_one();
        trace!("training resumed");
    }

    /// Cancels the active run. The in-flight episode is abandoned and not
    /// reported; the completed-episode count is kept. Resets the throttle to slow.
    pub fn stop(&self) {
        let Some(control) = &self.control else { return };
        let active = self.shared.status.send_if_modified(|s| {
            if !matches!(s.run_state, RunState::Running | RunState::Paused) {
                return false;
            }
            s.run_state = RunState::Stopped;
            true
        });
        if !active {
            return;
        }
        control.cancel();
        self.set_throttle(Throttle::Slow);
        info!(episodes = self.shared.status.borrow().episode, "training stopped");
    }

    /// Stops the run and drops every episode listener. Later `start` calls fail.
    pub fn destroy(&mut self) {
        self.stop();
        if let Some(control) = &self.control {
            control.cancel();
        }
        self.shared.listeners.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.destroyed = true;
    }

    pub fn set_throttle(&self, throttle: Throttle) {
        self.shared.throttle.store(throttle == Throttle::Fast, Ordering::SeqCst);
        self.shared.status.send_if_modified(|s| {
            let changed = s.throttle != throttle;
            s.throttle = throttle;
            changed
        });
    }

    pub fn toggle_throttle(&self) -> Throttle {
        let throttle = self.shared.throttle().toggled();
        self.set_throttle(throttle);
        throttle
    }

    pub fn throttle(&self) -> Throttle {
        self.shared.throttle()
    }

    /// Registers a callback for completed episodes. Listeners run on the
    /// training task and must not call back into `on_episode`.
    pub fn on_episode(&self, listener: impl Fn(&EpisodeReport) + Send + Sync + 'static) {
        if self.destroyed {
            return;
        }
        self.shared.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(listener));
    }

    pub fn status(&self) -> Status {
        self.shared.status.borrow().clone()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.status.borrow().run_state
    }

    /// Receiver that is notified on every published status change.
    pub fn watch(&self) -> watch::Receiver<Status> {
        self.shared.status.subscribe()
    }

    /// Waits for the most recent run to exit. `None` if nothing was started
    /// or the task panicked.
    pub async fn join(&mut self) -> Option<RunSummary> {
        let task = self.task.take()?;
        task.await.ok()
    }

    /// Locks the session for inspection. Waits while a run holds it.
    pub async fn session(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        if let Some(control) = &self.control {
            control.cancel();
        }
    }
}

async fn run(
    session: Arc<tokio::sync::Mutex<Session>>,
    shared: Arc<Shared>,
    control: Arc<Control>,
    config: TrainerConfig,
    generation: u64,
) -> RunSummary {
    let mut session = session.lock().await;
    info!(episode_limit = config.episode_limit, throttle = ?shared.throttle(), "training run started");

    let yield_every = config.fast_yield_interval.max(1);
    let mut steps: u32 = 0;
    let mut episode = 0;

    let outcome = 'episodes: loop {
        if control.is_cancelled() {
            break RunOutcome::Cancelled;
        }
        if episode >= config.episode_limit {
            break RunOutcome::Completed;
        }

        let mut state = session.game.reset();
        shared.publish(generation, |s| s.observe(&session));

        while !session.game.is_done() {
            if control.is_cancelled() {
                break 'episodes RunOutcome::Cancelled;
            }
            if control.is_paused() {
                control.wait_resumed().await;
                continue;
            }

            state = session.advance(state).state;
            shared.publish(generation, |s| s.observe(&session));

            match shared.throttle() {
                Throttle::Slow => tokio::time::sleep(config.slow_step_delay()).await,
                Throttle::Fast => {
                    steps = steps.wrapping_add(1);
                    if steps % yield_every == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
        // a stop observed during the last yield still abandons the episode
        if control.is_cancelled() {
            break RunOutcome::Cancelled;
        }

        let report = session.finish_episode(episode);
        debug!(episode = report.episode, score = report.score, epsilon = report.epsilon, "episode finished");
        shared.emit(generation, &report);
        episode += 1;
        shared.publish(generation, |s| {
            s.episode = episode;
            s.observe(&session);
        });
    };

    let highest_score = session.highest_score;
    shared.publish(generation, |s| {
        s.run_state = outcome.final_state(s.run_state);
    });
    info!(episodes = episode, highest_score, ?outcome, "training run finished");
    RunSummary { outcome, episodes: episode, highest_score }
}
