//! Configuration of [`Trainer`](super::Trainer).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Configuration of [`Trainer`](super::Trainer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct TrainerConfig {
    /// Total number of environment steps of the run.
    pub total_timesteps: usize,

    /// Environment steps collected before the first optimization step.
    pub learning_starts: usize,

    /// Evaluation interval in environment steps.
    ///
    /// Without a separate evaluation environment, evaluation happens at the
    /// end of every `max(1, log_interval / max_episode_length)`-th episode.
    pub log_interval: usize,

    /// Truncation length of training and evaluation episodes.
    pub max_episode_length: Option<usize>,

    /// Number of deterministic episodes per evaluation.
    pub n_eval_episodes: usize,

    /// Where checkpoints are written. Nothing is saved when `None`.
    pub model_dir: Option<PathBuf>,

    /// Whether the replay buffer is saved next to the checkpoints.
    pub save_replay_buffer: bool,

    /// Seed of the training environment. The evaluation environment uses `seed + 1`.
    pub seed: i64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            total_timesteps: 10_000,
            learning_starts: 1_000,
            log_interval: 100,
            max_episode_length: None,
            n_eval_episodes: 5,
            model_dir: None,
            save_replay_buffer: false,
            seed: 0,
        }
    }
}

impl TrainerConfig {
    /// Sets the total number of environment steps.
    pub fn total_timesteps(mut self, v: usize) -> Self {
        self.total_timesteps = v;
        self
    }

    /// Sets the warmup period in environment steps.
    pub fn learning_starts(mut self, v: usize) -> Self {
        self.learning_starts = v;
        self
    }

    /// Sets the evaluation interval.
    pub fn log_interval(mut self, v: usize) -> Self {
        self.log_interval = v;
        self
    }

    /// Sets the maximum episode length.
    pub fn max_episode_length(mut self, v: usize) -> Self {
        self.max_episode_length = Some(v);
        self
    }

    /// Sets the number of evaluation episodes.
    pub fn n_eval_episodes(mut self, v: usize) -> Self {
        self.n_eval_episodes = v;
        self
    }

    /// Sets the directory where checkpoints are written.
    pub fn model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(model_dir.into());
        self
    }

    /// Sets whether the replay buffer is saved with checkpoints.
    pub fn save_replay_buffer(mut self, v: bool) -> Self {
        self.save_replay_buffer = v;
        self
    }

    /// Sets the seed of the environments.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
