//! Agent.
use super::{Env, Policy, ReplayBufferBase};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy on an environment.
pub trait Agent<E: Env, R: ReplayBufferBase>: Policy<E> {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs an optimization step.
    fn opt(&mut self, buffer: &mut R) -> Result<()> {
        self.opt_with_record(buffer).map(|_| ())
    }

    /// Performs an optimization step and returns scalar losses and coefficients.
    ///
    /// Fails with [`VapoError::InsufficientData`] when `buffer` holds fewer
    /// transitions than [`Agent::batch_size`].
    ///
    /// [`VapoError::InsufficientData`]: crate::error::VapoError::InsufficientData
    fn opt_with_record(&mut self, buffer: &mut R) -> Result<Record>;

    /// Number of transitions sampled per optimization step.
    fn batch_size(&self) -> usize;

    /// Dimension of the actions emitted by the policy.
    fn action_dim(&self) -> usize;

    /// Number of optimization steps performed so far.
    fn n_opts(&self) -> usize;

    /// Writes all learnable state of the agent into a single file.
    fn save_params(&self, path: &Path) -> Result<()>;

    /// Restores the state written by [`Agent::save_params`].
    ///
    /// Fails with [`VapoError::CheckpointNotFound`] when `path` does not exist.
    ///
    /// [`VapoError::CheckpointNotFound`]: crate::error::VapoError::CheckpointNotFound
    fn load_params(&mut self, path: &Path) -> Result<()>;
}
