//! Generic implementation of a circular replay buffer.
//!
//! - [`SimpleReplayBuffer`]: fixed-capacity buffer with uniform sampling
//! - [`GenericTransitionBatch`]: column-oriented batch of transitions
//! - [`SimpleStepProcessor`]: converts environment steps into transitions
//! - [`SharedReplayBuffer`]: lock-guarded handle for concurrent rollout workers
mod base;
mod batch;
mod config;
mod shared;
mod step_proc;
pub use base::SimpleReplayBuffer;
pub use batch::{BatchBase, GenericTransitionBatch};
pub use config::SimpleReplayBufferConfig;
pub use shared::SharedReplayBuffer;
pub use step_proc::{SimpleStepProcessor, SimpleStepProcessorConfig};
