//! Counters of a training run.
use crate::util::atomic_write;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Progress of a training run.
///
/// The counters and best returns are written next to every checkpoint and
/// restored on load. The per-episode accumulators are not persisted, a resumed
/// run starts with a fresh episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Environment steps taken so far.
    pub env_steps: usize,

    /// Completed training episodes.
    pub episodes: usize,

    /// Best return of a training episode.
    pub best_train_return: Option<f64>,

    /// Best mean return of an evaluation.
    pub best_eval_return: Option<f64>,

    /// Length of the running episode.
    #[serde(skip)]
    pub episode_length: usize,

    /// Return of the running episode.
    #[serde(skip)]
    pub episode_return: f64,
}

impl TrainingState {
    pub(super) fn reset_episode(&mut self) {
        self.episode_length = 0;
        self.episode_return = 0.0;
    }

    /// Saves the state as YAML.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, serde_yaml::to_string(self)?.as_bytes())
    }

    /// Loads the state written by [`TrainingState::save`].
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
    }
}
