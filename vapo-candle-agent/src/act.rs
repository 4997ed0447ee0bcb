use crate::TensorBatch;
use candle_core::{Tensor, D};
use vapo_core::Act;

/// Continuous action of shape `(batch_size, action_dim)`.
#[derive(Clone, Debug)]
pub struct TensorAct(pub Tensor);

impl Act for TensorAct {
    fn len(&self) -> usize {
        self.0.dim(D::Minus1).unwrap_or(0)
    }
}

impl From<Tensor> for TensorAct {
    fn from(t: Tensor) -> Self {
        Self(t)
    }
}

impl From<TensorAct> for TensorBatch {
    fn from(act: TensorAct) -> Self {
        TensorBatch::from_tensor(act.0)
    }
}

impl From<TensorAct> for Tensor {
    fn from(act: TensorAct) -> Self {
        act.0
    }
}
