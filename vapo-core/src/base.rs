//! Core functionalities.
mod agent;
mod env;
mod policy;
mod replay_buffer;
mod space;
mod step;
pub use agent::Agent;
pub use env::Env;
pub use policy::{Configurable, Policy};
pub use replay_buffer::{ExperienceBufferBase, ReplayBufferBase, TransitionBatch};
pub use space::{ActionSpace, ObsSpace};
use std::fmt::Debug;
pub use step::{Info, Step, StepProcessor};

/// An observation of an environment.
///
/// The engine treats observations as opaque records. Conversion into network
/// inputs and replay buffer storage is done through `From`/`TryFrom` impls
/// provided by the environment crate.
pub trait Obs: Clone + Debug {}

/// An action of an environment.
pub trait Act: Clone + Debug {
    /// Returns the dimension of the action vector.
    fn len(&self) -> usize;
}
