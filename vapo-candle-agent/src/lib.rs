//! Soft actor-critic agent implemented with [candle](https://crates.io/crates/candle-core).
//!
//! The agent [`sac::Sac`] implements [`vapo_core::Agent`] and is trained by
//! [`vapo_core::Trainer`]. Observations are [`ObsTensors`], maps from channel
//! names to tensors, and actions are [`TensorAct`].
pub mod cnn;
pub mod encoder;
pub mod heads;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod point_reach;
pub mod sac;
pub mod util;
mod act;
mod obs;
mod tensor_batch;
use anyhow::Result;
use serde::{Deserialize, Serialize};
pub use act::TensorAct;
pub use obs::{ObsBatch, ObsTensors};
pub use tensor_batch::TensorBatch;

#[derive(Clone, Debug, Copy, Default, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    #[default]
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Device {
    /// Returns the corresponding candle device.
    pub fn build(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}
