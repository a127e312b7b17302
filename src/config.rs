use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SnakeError};

/// Board dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub width: u16,
    pub height: u16,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self { width: 40, height: 20 }
    }
}

impl BoardConfig {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The game needs one cell for the head and one for the food.
    pub fn validate(&self) -> Result<()> {
        if self.cells() < 2 {
            return Err(SnakeError::BoardTooSmall { width: self.width, height: self.height });
        }
        Ok(())
    }
}

/// Q-learning hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate
    pub alpha: f32,
    /// Discount factor
    pub gamma: f32,
    /// Starting exploration rate
    pub epsilon: f32,
    /// Exploration floor
    pub min_epsilon: f32,
    /// Multiplier applied once per finished episode
    pub epsilon_decay: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { alpha: 0.1, gamma: 0.9, epsilon: 1.0, min_epsilon: 0.0, epsilon_decay: 0.995 }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(SnakeError::InvalidAgentConfig(format!("{name} must be in [0, 1], got {v}")))
            }
        };
        unit("alpha", self.alpha)?;
        unit("gamma", self.gamma)?;
        unit("epsilon", self.epsilon)?;
        unit("min_epsilon", self.min_epsilon)?;
        unit("epsilon_decay", self.epsilon_decay)?;
        if self.min_epsilon > self.epsilon {
            return Err(SnakeError::InvalidAgentConfig(format!(
                "min_epsilon {} exceeds starting epsilon {}",
                self.min_epsilon, self.epsilon
            )));
        }
        Ok(())
    }
}

/// How often the training loop hands control back to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Throttle {
    /// Yield only every `fast_yield_interval` steps.
    Fast,
    /// Sleep `slow_step_delay_ms` after every step.
    #[default]
    Slow,
}

impl Throttle {
    pub fn toggled(self) -> Self {
        match self {
            Throttle::Fast => Throttle::Slow,
            Throttle::Slow => Throttle::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub episode_limit: usize,
    pub throttle: Throttle,
    pub slow_step_delay_ms: u64,
    pub fast_yield_interval: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self { episode_limit: 5000, throttle: Throttle::Slow, slow_step_delay_ms: 20, fast_yield_interval: 200 }
    }
}

impl TrainerConfig {
    pub fn slow_step_delay(&self) -> Duration {
        Duration::from_millis(self.slow_step_delay_ms)
    }
}

/// Everything needed to build a training session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnakeConfig {
    pub board: BoardConfig,
    pub agent: AgentConfig,
    pub trainer: TrainerConfig,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
}

impl SnakeConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SnakeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| SnakeError::ConfigIo { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.board.validate()?;
        self.agent.validate()
    }

    /// Independent streams for the game and the agent, reproducible when
    /// `seed` is set.
    pub fn rngs(&self) -> (SmallRng, SmallRng) {
        match self.seed {
            Some(seed) => (SmallRng::seed_from_u64(seed), SmallRng::seed_from_u64(seed ^ AGENT_SEED_SALT)),
            None => (SmallRng::from_entropy(), SmallRng::from_entropy()),
        }
    }
}

const AGENT_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;
