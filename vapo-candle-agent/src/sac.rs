//! Soft actor-critic (SAC) agent.
mod actor;
mod base;
mod checkpoint;
mod config;
mod critic;
mod ent_coef;
pub use actor::{GaussianActor, GaussianActorConfig};
pub use base::Sac;
pub use checkpoint::{ModelState, SacCheckpoint, CHECKPOINT_VERSION};
pub use config::SacConfig;
pub use critic::{CriticConfig, TwinCritic};
pub use ent_coef::{EntCoef, EntCoefMode, EntCoefState};
