//! Versioned bundle of the learnable state of [`Sac`](super::Sac).
use super::EntCoefState;
use crate::{opt::OptimizerState, util::NamedTensors};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use vapo_core::{error::VapoError, util::atomic_write};

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Parameters of a network and the moments of its optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub params: NamedTensors,
    pub opt: OptimizerState,
}

/// Everything [`Sac`](super::Sac) needs to resume training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacCheckpoint {
    /// Must be the first field, it is read alone before the rest.
    pub version: u32,
    pub n_opts: usize,
    pub actor: ModelState,
    pub critic_1: NamedTensors,
    pub critic_1_target: NamedTensors,
    pub critic_2: NamedTensors,
    pub critic_2_target: NamedTensors,

    /// Joint optimizer of both live critics.
    pub critics_opt: OptimizerState,
    pub ent_coef: EntCoefState,
}

impl SacCheckpoint {
    /// Writes the checkpoint into a single file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, &bincode::serialize(self)?)?;
        info!("Save SAC checkpoint to {:?}", path);
        Ok(())
    }

    /// Reads a checkpoint.
    ///
    /// Fails with [`VapoError::CheckpointNotFound`] for a missing file and
    /// with [`VapoError::IncompatibleCheckpoint`] for another format version.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VapoError::CheckpointNotFound(path.to_path_buf()).into());
        }
        let bytes = fs::read(path)?;
        let version: u32 = bincode::deserialize(&bytes).map_err(|e| {
            VapoError::IncompatibleCheckpoint(format!("unreadable checkpoint {:?}: {}", path, e))
        })?;
        if version != CHECKPOINT_VERSION {
            return Err(VapoError::IncompatibleCheckpoint(format!(
                "checkpoint version {}, expected {}",
                version, CHECKPOINT_VERSION
            ))
            .into());
        }
        let checkpoint = bincode::deserialize(&bytes).map_err(|e| {
            VapoError::IncompatibleCheckpoint(format!("unreadable checkpoint {:?}: {}", path, e))
        })?;
        info!("Load SAC checkpoint from {:?}", path);
        Ok(checkpoint)
    }
}
