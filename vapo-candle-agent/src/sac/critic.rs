//! Critic of SAC agent.
use crate::{
    model::SubModel2,
    opt::{Optimizer, OptimizerConfig},
    util::{sorted_vars, track},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Variable prefix of the first critic.
pub const CRITIC_1: &str = "critic_1";

/// Variable prefix of the second critic.
pub const CRITIC_2: &str = "critic_2";

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`TwinCritic`].
pub struct CriticConfig<Q> {
    pub q_config: Option<Q>,
    pub opt_config: OptimizerConfig,
}

impl<Q> Default for CriticConfig<Q> {
    fn default() -> Self {
        Self {
            q_config: None,
            opt_config: OptimizerConfig::default(),
        }
    }
}

impl<Q> CriticConfig<Q>
where
    Q: DeserializeOwned + Serialize,
{
    /// Sets configurations for action-value function.
    pub fn q_config(mut self, v: Q) -> Self {
        self.q_config = Some(v);
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [CriticConfig] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [CriticConfig].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Two action-value functions and their target copies.
///
/// The live critics share one [`VarMap`] and one optimizer. The targets live
/// in a second [`VarMap`] with the same variable names and are only changed by
/// [`TwinCritic::soft_update`].
pub struct TwinCritic<Q>
where
    Q: SubModel2<Output = Tensor>,
{
    varmap: VarMap,
    varmap_tgt: VarMap,
    q1: Q,
    q2: Q,
    q1_tgt: Q,
    q2_tgt: Q,
    opt: Optimizer,
}

impl<Q> TwinCritic<Q>
where
    Q: SubModel2<Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`TwinCritic`] with the targets equal to the live critics.
    pub fn build(config: CriticConfig<Q::Config>, device: &Device) -> Result<Self> {
        let q_config = config.q_config.context("q_config is not set.")?;
        let varmap = VarMap::new();
        let varmap_tgt = VarMap::new();
        let (q1, q2) = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
            (
                Q::build(vb.pp(CRITIC_1), q_config.clone())?,
                Q::build(vb.pp(CRITIC_2), q_config.clone())?,
            )
        };
        let (q1_tgt, q2_tgt) = {
            let vb = VarBuilder::from_varmap(&varmap_tgt, DType::F32, device);
            (
                Q::build(vb.pp(CRITIC_1), q_config.clone())?,
                Q::build(vb.pp(CRITIC_2), q_config)?,
            )
        };
        track(&varmap_tgt, &varmap, 1.0)?;
        let opt = config.opt_config.build(sorted_vars(&varmap)?)?;
        info!(
            "Built twin critic with {} variables",
            varmap.all_vars().len()
        );

        Ok(Self {
            varmap,
            varmap_tgt,
            q1,
            q2,
            q1_tgt,
            q2_tgt,
            opt,
        })
    }

    /// Outputs the action values of both live critics.
    pub fn forward(&self, obs: &Q::Input1, act: &Q::Input2) -> Result<(Tensor, Tensor)> {
        Ok((self.q1.forward(obs, act)?, self.q2.forward(obs, act)?))
    }

    /// Elementwise minimum of the live critics.
    pub fn min(&self, obs: &Q::Input1, act: &Q::Input2) -> Result<Tensor> {
        let (q1, q2) = self.forward(obs, act)?;
        Ok(q1.minimum(&q2)?)
    }

    /// Elementwise minimum of the target critics.
    pub fn min_tgt(&self, obs: &Q::Input1, act: &Q::Input2) -> Result<Tensor> {
        let q1 = self.q1_tgt.forward(obs, act)?;
        let q2 = self.q2_tgt.forward(obs, act)?;
        Ok(q1.minimum(&q2)?)
    }

    /// Applies a backward pass of `loss` and a step over both live critics.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }

    /// `target <- tau * live + (1 - tau) * target` for both critics.
    pub fn soft_update(&self, tau: f64) -> Result<()> {
        track(&self.varmap_tgt, &self.varmap, tau)
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn varmap_tgt(&self) -> &VarMap {
        &self.varmap_tgt
    }

    pub fn opt(&self) -> &Optimizer {
        &self.opt
    }

    pub fn opt_mut(&mut self) -> &mut Optimizer {
        &mut self.opt
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        encoder::EncoderConfig,
        heads::{QNetwork, QNetworkConfig},
        util::named_tensors,
        ObsTensors,
    };
    use candle_nn::loss::mse;

    fn critic() -> Result<TwinCritic<QNetwork>> {
        let q_config = QNetworkConfig::new(EncoderConfig::Vector { dim: 2 }, 1).units(vec![8]);
        TwinCritic::build(CriticConfig::default().q_config(q_config), &Device::Cpu)
    }

    #[test]
    fn test_targets_start_equal_and_critics_differ() -> Result<()> {
        let critic = critic()?;
        assert_eq!(
            named_tensors(critic.varmap(), "")?,
            named_tensors(critic.varmap_tgt(), "")?
        );

        let c1 = named_tensors(critic.varmap(), "critic_1.")?;
        let c2 = named_tensors(critic.varmap(), "critic_2.")?;
        assert_eq!(c1.len(), c2.len());
        assert_ne!(c1.values().collect::<Vec<_>>(), c2.values().collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_step_leaves_targets() -> Result<()> {
        let mut critic = critic()?;
        let tgt_before = named_tensors(critic.varmap_tgt(), "")?;
        let obs = ObsTensors::vector(Tensor::ones((4, 2), DType::F32, &Device::Cpu)?);
        let act = Tensor::ones((4, 1), DType::F32, &Device::Cpu)?;
        let y = Tensor::ones((4,), DType::F32, &Device::Cpu)?;
        let (q1, q2) = critic.forward(&obs, &act)?;
        let loss = (mse(&q1, &y)? + mse(&q2, &y)?)?;
        critic.backward_step(&loss)?;

        assert_eq!(named_tensors(critic.varmap_tgt(), "")?, tgt_before);
        assert_ne!(named_tensors(critic.varmap(), "")?, tgt_before);

        critic.soft_update(1.0)?;
        assert_eq!(
            named_tensors(critic.varmap(), "")?,
            named_tensors(critic.varmap_tgt(), "")?
        );
        Ok(())
    }
}
