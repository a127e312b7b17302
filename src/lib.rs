//! Snake simulation with a tabular Q-learning agent and a cooperative,
//! pausable training scheduler.

pub mod agent;
pub mod config;
pub mod error;
pub mod game;
pub mod manual;
pub mod pos;
pub mod sweep;
pub mod trainer;

pub use agent::{QAgent, QSnapshot, decode_snapshot, encode_snapshot};
pub use config::{AgentConfig, BoardConfig, SnakeConfig, Throttle, TrainerConfig};
pub use error::{Result, SnakeError};
pub use game::{Action, Dir, Game, StateVector, Step, compute_new_direction, relative_action_for};
pub use manual::ManualGame;
pub use pos::Pos;
pub use sweep::{SweepResult, sweep};
pub use trainer::{EpisodeReport, RunOutcome, RunState, RunSummary, Session, Status, Trainer};
