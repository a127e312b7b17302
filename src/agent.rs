use crate::config::AgentConfig;
use crate::error::{Result, SnakeError};
use crate::game::{ACTIONS, Action, StateVector};
use ahash::AHashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ============================
// Tabular Q-learning agent
// ============================

/// Epsilon-greedy tabular Q-learner. One row of action values per observed
/// state; rows are never removed.
pub struct QAgent {
    q: AHashMap<StateVector, [f32; ACTIONS]>,
    config: AgentConfig,
    epsilon: f32,
    rng: SmallRng,
}

impl QAgent {
    pub fn new(config: AgentConfig, rng: SmallRng) -> Self {
        Self { q: AHashMap::new(), config, epsilon: config.epsilon, rng }
    }

    pub fn with_seed(config: AgentConfig, seed: u64) -> Self {
        Self::new(config, SmallRng::seed_from_u64(seed))
    }

    pub fn from_entropy(config: AgentConfig) -> Self {
        Self::new(config, SmallRng::from_entropy())
    }

    fn qs(&self, s: StateVector) -> [f32; ACTIONS] {
        self.q.get(&s).copied().unwrap_or([0.0; ACTIONS])
    }

    /// Value of `a` in `s`; zero for pairs never updated.
    pub fn q(&self, s: StateVector, a: Action) -> f32 {
        self.qs(s)[a.index()]
    }

    fn max_q(&self, s: StateVector) -> f32 {
        self.qs(s).into_iter().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn update_q(&mut self, s: StateVector, a: Action, r: f32, ns: StateVector) {
        let next_max = self.max_q(ns);
        let alpha = self.config.alpha;
        let gamma = self.config.gamma;
        let qsa = self.q.entry(s).or_insert([0.0; ACTIONS]);
        let i = a.index();
        qsa[i] = (1.0 - alpha) * qsa[i] + alpha * (r + gamma * next_max);
    }

    /// Explores with probability epsilon, otherwise picks uniformly among the
    /// actions tied for the highest value.
    pub fn choose_action(&mut self, s: StateVector) -> Action {
        if self.rng.r#gen::<f32>() < self.epsilon {
            return Action::ALL[self.rng.gen_range(0..ACTIONS)];
        }
        let qs = self.qs(s);
        let best = self.max_q(s);
        let mut ties = [Action::Forward; ACTIONS];
        let mut n = 0;
        for a in Action::ALL {
            if qs[a.index()] == best {
                ties[n] = a;
                n += 1;
            }
        }
        if n == 0 {
            return Action::Forward;
        }
        ties[self.rng.gen_range(0..n)]
    }

    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Overrides the exploration rate, clamped to `[min_epsilon, 1]`.
    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon.max(self.config.min_epsilon).min(1.0);
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Number of states with at least one learned value.
    pub fn table_len(&self) -> usize {
        self.q.len()
    }

    pub fn snapshot(&self) -> QSnapshot {
        let mut rows: Vec<(u16, [f32; ACTIONS])> = self.q.iter().map(|(s, qs)| (s.bits(), *qs)).collect();
        rows.sort_unstable_by_key(|&(bits, _)| bits);
        QSnapshot { epsilon: self.epsilon, rows }
    }

    /// Rebuilds an agent from a snapshot, rejecting keys outside the 11-bit
    /// state space.
    pub fn from_snapshot(config: AgentConfig, snapshot: &QSnapshot, rng: SmallRng) -> Result<Self> {
        let mut agent = Self::new(config, rng);
        for &(bits, qs) in &snapshot.rows {
            let s = StateVector::from_bits(bits).ok_or(SnakeError::CorruptSnapshot(bits))?;
            agent.q.insert(s, qs);
        }
        agent.set_epsilon(snapshot.epsilon);
        Ok(agent)
    }
}

/// Portable copy of a learned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QSnapshot {
    pub epsilon: f32,
    pub rows: Vec<(u16, [f32; ACTIONS])>,
}

pub fn encode_snapshot(snapshot: &QSnapshot) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(snapshot, bincode::config::standard())?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<QSnapshot> {
    let (snapshot, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(snapshot)
}
