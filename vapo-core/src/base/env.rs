//! Environment.
use super::{Act, ActionSpace, Info, Obs, ObsSpace, Step};
use crate::record::Record;
use anyhow::Result;

/// Represents an environment, typically an MDP.
///
/// `reset` and `step` are blocking calls and may be expensive, as they can
/// drive a simulator or real hardware. Errors raised by them are fatal for
/// the training loop.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Obs;

    /// Action of the environment.
    type Act: Act;

    /// Information in the [`Step`] object.
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Resets the environment and returns the initial observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Performes an environment step.
    fn step(&mut self, a: &Self::Act) -> Result<(Step<Self>, Record)>
    where
        Self: Sized;

    /// Declared bounds and dimensionality of actions.
    fn action_space(&self) -> &ActionSpace;

    /// Declared schema of observations.
    fn observation_space(&self) -> &ObsSpace;
}
