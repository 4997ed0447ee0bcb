//! Policy and action-value networks over [`ObsTensors`].
use crate::{
    encoder::{Encoder, EncoderConfig},
    mlp::{Mlp, Mlp2, MlpConfig},
    model::{SubModel1, SubModel2},
    util::OutDim,
    ObsTensors,
};
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

fn default_units() -> Vec<usize> {
    vec![256, 256]
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`GaussianPolicy`].
pub struct GaussianPolicyConfig {
    /// Feature extractor.
    pub encoder: EncoderConfig,

    /// Hidden units of the MLP.
    #[serde(default = "default_units")]
    pub units: Vec<usize>,

    /// Dimension of actions.
    pub action_dim: usize,
}

impl GaussianPolicyConfig {
    /// Constructs the configuration with two hidden layers of 256 units.
    pub fn new(encoder: EncoderConfig, action_dim: usize) -> Self {
        Self {
            encoder,
            units: default_units(),
            action_dim,
        }
    }

    /// Sets the hidden units.
    pub fn units(mut self, units: Vec<usize>) -> Self {
        self.units = units;
        self
    }
}

impl OutDim for GaussianPolicyConfig {
    fn get_out_dim(&self) -> usize {
        self.action_dim
    }

    fn set_out_dim(&mut self, v: usize) {
        self.action_dim = v;
    }
}

/// Outputs the mean and the log standard deviation of a diagonal Gaussian.
pub struct GaussianPolicy {
    encoder: Encoder,
    mlp: Mlp2,
}

impl SubModel1 for GaussianPolicy {
    type Config = GaussianPolicyConfig;
    type Input = ObsTensors;
    type Output = (Tensor, Tensor);

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let in_dim = config.encoder.out_dim();
        let encoder = Encoder::build(vb.pp("encoder"), config.encoder)?;
        let mlp_config = MlpConfig::new(in_dim, config.units, config.action_dim, false);
        let mlp = Mlp2::build(vb.pp("pi"), mlp_config)?;
        Ok(Self { encoder, mlp })
    }

    fn forward(&self, obs: &Self::Input) -> Result<Self::Output> {
        let features = self.encoder.forward(obs)?;
        self.mlp.forward(&features)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`QNetwork`].
pub struct QNetworkConfig {
    /// Feature extractor.
    pub encoder: EncoderConfig,

    /// Hidden units of the MLP.
    #[serde(default = "default_units")]
    pub units: Vec<usize>,

    /// Dimension of actions.
    pub action_dim: usize,
}

impl QNetworkConfig {
    /// Constructs the configuration with two hidden layers of 256 units.
    pub fn new(encoder: EncoderConfig, action_dim: usize) -> Self {
        Self {
            encoder,
            units: default_units(),
            action_dim,
        }
    }

    /// Sets the hidden units.
    pub fn units(mut self, units: Vec<usize>) -> Self {
        self.units = units;
        self
    }
}

/// Action-value function `Q(o, a)` of shape `(batch_size,)`.
pub struct QNetwork {
    encoder: Encoder,
    mlp: Mlp,
}

impl SubModel2 for QNetwork {
    type Config = QNetworkConfig;
    type Input1 = ObsTensors;
    type Input2 = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let in_dim = config.encoder.out_dim() + config.action_dim;
        let encoder = Encoder::build(vb.pp("encoder"), config.encoder)?;
        let mlp_config = MlpConfig::new(in_dim, config.units, 1, false);
        let mlp = <Mlp as SubModel2>::build(vb.pp("q"), mlp_config)?;
        Ok(Self { encoder, mlp })
    }

    fn forward(&self, obs: &Self::Input1, act: &Self::Input2) -> Result<Tensor> {
        let features = self.encoder.forward(obs)?;
        let q = SubModel2::forward(&self.mlp, &features, act)?;
        Ok(q.squeeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_head_shapes() -> Result<()> {
        let encoder = EncoderConfig::Vector { dim: 3 };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let pi_config = GaussianPolicyConfig::new(encoder.clone(), 2).units(vec![16]);
        let pi = GaussianPolicy::build(vb.pp("actor"), pi_config)?;
        let q = QNetwork::build(vb.pp("critic"), QNetworkConfig::new(encoder, 2).units(vec![16]))?;

        let obs = ObsTensors::vector(Tensor::zeros((5, 3), DType::F32, &Device::Cpu)?);
        let act = Tensor::zeros((5, 2), DType::F32, &Device::Cpu)?;
        let (mean, log_std) = pi.forward(&obs)?;
        assert_eq!(mean.dims(), &[5, 2]);
        assert_eq!(log_std.dims(), &[5, 2]);
        assert_eq!(q.forward(&obs, &act)?.dims(), &[5]);
        Ok(())
    }
}
