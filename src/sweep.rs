use crate::config::SnakeConfig;
use crate::error::Result;
use crate::trainer::Session;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Scores are averaged over this many trailing episodes.
pub const RECENT_WINDOW: usize = 100;

/// Outcome of one headless training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub seed: u64,
    pub episodes: usize,
    pub highest_score: u32,
    /// Mean score over the last `RECENT_WINDOW` episodes
    pub recent_mean: f32,
    pub final_epsilon: f32,
    pub table_len: usize,
}

/// Trains one session per seed, in parallel, each for
/// `config.trainer.episode_limit` episodes without yielding.
pub fn sweep(config: &SnakeConfig, seeds: &[u64]) -> Result<Vec<SweepResult>> {
    config.validate()?;
    seeds
        .par_iter()
        .map(|&seed| -> Result<SweepResult> {
            let config = SnakeConfig { seed: Some(seed), ..config.clone() };
            let mut session = Session::from_config(&config)?;
            let episodes = config.trainer.episode_limit;
            let mut recent = VecDeque::with_capacity(RECENT_WINDOW.min(episodes));
            for episode in 0..episodes {
                let report = session.run_episode(episode);
                if recent.len() == RECENT_WINDOW {
                    recent.pop_front();
                }
                recent.push_back(report.score);
            }
            let recent_mean = if recent.is_empty() {
                0.0
            } else {
                recent.iter().sum::<u32>() as f32 / recent.len() as f32
            };
            Ok(SweepResult {
                seed,
                episodes,
                highest_score: session.highest_score(),
                recent_mean,
                final_epsilon: session.agent().epsilon(),
                table_len: session.agent().table_len(),
            })
        })
        .collect()
}
