//! Actor of SAC agent.
use crate::{
    model::SubModel1,
    opt::{Optimizer, OptimizerConfig},
    util::{sorted_vars, OutDim},
};
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use vapo_core::{error::VapoError, ActionSpace};

fn default_min_log_std() -> f64 {
    -20.0
}

fn default_max_log_std() -> f64 {
    2.0
}

fn default_epsilon() -> f64 {
    1e-6
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`GaussianActor`].
pub struct GaussianActorConfig<P> {
    pub pi_config: Option<P>,
    pub opt_config: OptimizerConfig,

    /// Lower bound of the log standard deviation.
    #[serde(default = "default_min_log_std")]
    pub min_log_std: f64,

    /// Upper bound of the log standard deviation.
    #[serde(default = "default_max_log_std")]
    pub max_log_std: f64,

    /// Added inside the log of the squashing correction.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl<P> Default for GaussianActorConfig<P> {
    fn default() -> Self {
        Self {
            pi_config: None,
            opt_config: OptimizerConfig::default(),
            min_log_std: default_min_log_std(),
            max_log_std: default_max_log_std(),
            epsilon: default_epsilon(),
        }
    }
}

impl<P> GaussianActorConfig<P>
where
    P: DeserializeOwned + Serialize + OutDim,
{
    /// Sets configurations of the policy network.
    pub fn pi_config(mut self, v: P) -> Self {
        self.pi_config = Some(v);
        self
    }

    /// Sets output dimension of the model.
    pub fn out_dim(mut self, v: usize) -> Self {
        if let Some(pi_config) = &mut self.pi_config {
            pi_config.set_out_dim(v);
        }
        self
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`GaussianActorConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`GaussianActorConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Tanh-squashed diagonal Gaussian policy.
///
/// Actions are `tanh(u) * scale + bias` with `u ~ N(mean, std)`, where
/// `scale` and `bias` map `(-1, 1)` onto the bounds of the action space.
pub struct GaussianActor<P>
where
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    device: Device,
    varmap: VarMap,

    // Dimension of the action vector.
    out_dim: usize,
    pi: P,
    opt: Optimizer,

    /// `(1, out_dim)`
    scale: Tensor,

    /// `(1, out_dim)`
    bias: Tensor,
    min_log_std: f64,
    max_log_std: f64,
    epsilon: f64,
}

impl<P> GaussianActor<P>
where
    P: SubModel1<Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Constructs [`GaussianActor`].
    ///
    /// Fails with [`VapoError::ActionDimMismatch`] when the output dimension of
    /// the policy differs from the dimension of `action_space`.
    pub fn build(
        config: GaussianActorConfig<P::Config>,
        action_space: &ActionSpace,
        device: Device,
    ) -> Result<Self> {
        let pi_config = config.pi_config.context("pi_config is not set.")?;
        let out_dim = pi_config.get_out_dim();
        if out_dim != action_space.dim() {
            return Err(VapoError::ActionDimMismatch {
                policy: out_dim,
                env: action_space.dim(),
            }
            .into());
        }
        let varmap = VarMap::new();
        let pi = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            P::build(vb, pi_config)?
        };
        let opt = config.opt_config.build(sorted_vars(&varmap)?)?;
        let scale = Tensor::from_vec(action_space.scale(), (1, out_dim), &device)?;
        let bias = Tensor::from_vec(action_space.bias(), (1, out_dim), &device)?;

        Ok(Self {
            device,
            varmap,
            out_dim,
            pi,
            opt,
            scale,
            bias,
            min_log_std: config.min_log_std,
            max_log_std: config.max_log_std,
            epsilon: config.epsilon,
        })
    }

    /// Outputs the mean and the clamped log standard deviation.
    pub fn forward(&self, obs: &P::Input) -> Result<(Tensor, Tensor)> {
        let (mean, log_std) = self.pi.forward(obs)?;
        debug_assert_eq!(mean.dims()[1], self.out_dim);
        let log_std = log_std.clamp(self.min_log_std, self.max_log_std)?;
        Ok((mean, log_std))
    }

    /// Returns actions and their log probabilities of shape `(batch_size,)`.
    ///
    /// * `deterministic` - Squashes the mean instead of a sample.
    /// * `reparametrize` - Keeps the gradient path from the sample to the
    ///   network outputs. Otherwise the pre-squash sample is detached.
    pub fn act(
        &self,
        obs: &P::Input,
        deterministic: bool,
        reparametrize: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (mean, log_std) = self.forward(obs)?;
        let z = if deterministic {
            mean.zeros_like()?
        } else {
            Tensor::randn(0f32, 1f32, mean.dims(), &self.device)?
        };
        let u = (&mean + (log_std.exp()? * &z)?)?;
        let u = match reparametrize {
            true => u,
            false => u.detach(),
        };

        // Log density of the Gaussian at `u`.
        let logp = ((z.sqr()? * -0.5)? - &log_std)?;
        let logp = (logp - 0.5 * (2.0 * std::f64::consts::PI).ln())?.sum(D::Minus1)?;

        // Jacobian of `u -> tanh(u) * scale + bias`.
        let tanh_u = u.tanh()?;
        let jac = (1f64 - tanh_u.sqr()?)?.broadcast_mul(&self.scale)?;
        let log_jac = (jac + self.epsilon)?.log()?.sum(D::Minus1)?;

        let act = tanh_u.broadcast_mul(&self.scale)?.broadcast_add(&self.bias)?;
        Ok((act, (logp - log_jac)?))
    }

    /// Applies a backward pass of `loss` and an optimizer step.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.opt.backward_step(loss)
    }

    /// Dimension of actions.
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
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
        heads::{GaussianPolicy, GaussianPolicyConfig},
        ObsTensors,
    };

    fn actor(action_space: &ActionSpace) -> Result<GaussianActor<GaussianPolicy>> {
        let pi_config = GaussianPolicyConfig::new(EncoderConfig::Vector { dim: 3 }, 2).units(vec![8]);
        GaussianActor::build(
            GaussianActorConfig::default().pi_config(pi_config),
            action_space,
            Device::Cpu,
        )
    }

    fn obs(batch_size: usize) -> Result<ObsTensors> {
        Ok(ObsTensors::vector(Tensor::randn(
            0f32,
            1f32,
            (batch_size, 3),
            &Device::Cpu,
        )?))
    }

    #[test]
    fn test_actions_within_bounds() -> Result<()> {
        let space = ActionSpace::new(vec![-2.0, 0.0], vec![2.0, 0.5])?;
        let actor = actor(&space)?;
        let obs = obs(64)?;
        for deterministic in [true, false] {
            let (act, logp) = actor.act(&obs, deterministic, false)?;
            assert_eq!(act.dims(), &[64, 2]);
            assert_eq!(logp.dims(), &[64]);
            for row in act.to_vec2::<f32>()? {
                assert!((-2.0..=2.0).contains(&row[0]));
                assert!((0.0..=0.5).contains(&row[1]));
            }
            assert!(logp.to_vec1::<f32>()?.iter().all(|v| v.is_finite()));
        }
        Ok(())
    }

    #[test]
    fn test_deterministic_action_is_squashed_mean() -> Result<()> {
        let space = ActionSpace::symmetric(2);
        let actor = actor(&space)?;
        let obs = obs(4)?;
        let (mean, _) = actor.forward(&obs)?;
        let (act, _) = actor.act(&obs, true, false)?;
        let (act2, _) = actor.act(&obs, true, false)?;
        assert_eq!(act.to_vec2::<f32>()?, mean.tanh()?.to_vec2::<f32>()?);
        assert_eq!(act.to_vec2::<f32>()?, act2.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = actor(&ActionSpace::symmetric(3)).err().expect("must fail");
        assert!(matches!(
            err.downcast_ref::<VapoError>(),
            Some(VapoError::ActionDimMismatch { policy: 2, env: 3 })
        ));
    }
}
