#![warn(missing_docs)]
//! Core abstractions of the vapo soft actor-critic engine.
//!
//! This crate is backend-agnostic. It defines the interfaces between an
//! environment, an agent and a replay buffer, a generic circular replay buffer,
//! the structured record types consumed by metrics sinks, and the [`Trainer`]
//! that drives warmup, training, evaluation and checkpointing.
pub mod error;
pub mod evaluator;
pub mod generic_replay_buffer;
pub mod record;
pub mod util;

#[cfg(test)]
mod testing;

mod base;
pub use base::{
    Act, ActionSpace, Agent, Configurable, Env, ExperienceBufferBase, Info, Obs, ObsSpace,
    Policy, ReplayBufferBase, Step, StepProcessor, TransitionBatch,
};

mod trainer;
pub use trainer::{Trainer, TrainerConfig, TrainingState};
