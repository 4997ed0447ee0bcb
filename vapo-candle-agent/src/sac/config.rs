//! Configuration of SAC agent.
use super::{CriticConfig, EntCoefMode, GaussianActorConfig};
use crate::{util::OutDim, Device};
use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use vapo_core::{error::VapoError, ActionSpace};

/// Configuration of [`Sac`](super::Sac).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(bound(deserialize = "Q: DeserializeOwned, P: DeserializeOwned"))]
pub struct SacConfig<Q, P>
where
    Q: Debug + PartialEq + Clone,
    P: OutDim + Debug + PartialEq + Clone,
{
    pub actor_config: GaussianActorConfig<P>,
    pub critic_config: CriticConfig<Q>,

    /// Discount factor.
    pub gamma: f64,

    /// Rate of the soft update of the target critics.
    pub tau: f64,
    pub ent_coef_mode: EntCoefMode,
    pub batch_size: usize,

    /// Multiplier of sampled rewards in the TD target.
    pub reward_scale: f32,

    /// Bounds of actions, `[-1, 1]^dim` when not given.
    pub action_space: Option<ActionSpace>,
    pub train: bool,
    pub device: Device,
}

impl<Q, P> Default for SacConfig<Q, P>
where
    Q: Debug + PartialEq + Clone,
    P: OutDim + Debug + PartialEq + Clone,
{
    fn default() -> Self {
        Self {
            actor_config: Default::default(),
            critic_config: Default::default(),
            gamma: 0.99,
            tau: 0.005,
            ent_coef_mode: EntCoefMode::default(),
            batch_size: 256,
            reward_scale: 1.0,
            action_space: None,
            train: false,
            device: Device::Cpu,
        }
    }
}

impl<Q, P> SacConfig<Q, P>
where
    Q: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Sets the configuration of the actor.
    pub fn actor_config(mut self, actor_config: GaussianActorConfig<P>) -> Self {
        self.actor_config = actor_config;
        self
    }

    /// Sets the configuration of the critic.
    pub fn critic_config(mut self, critic_config: CriticConfig<Q>) -> Self {
        self.critic_config = critic_config;
        self
    }

    /// Discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// SAC-alpha.
    pub fn ent_coef_mode(mut self, v: EntCoefMode) -> Self {
        self.ent_coef_mode = v;
        self
    }

    /// Batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Reward scale.
    ///
    /// It works for obtaining target values, not the values in logs.
    pub fn reward_scale(mut self, reward_scale: f32) -> Self {
        self.reward_scale = reward_scale;
        self
    }

    /// Bounds of actions.
    pub fn action_space(mut self, action_space: ActionSpace) -> Self {
        self.action_space = Some(action_space);
        self
    }

    /// Device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Checks the ranges of hyper-parameters.
    pub fn check(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(VapoError::InvalidConfig(msg).into()) };
        if !(self.tau > 0.0 && self.tau <= 1.0) {
            return invalid(format!("tau must be in (0, 1], got {}", self.tau));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid(format!("gamma must be in [0, 1], got {}", self.gamma));
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".to_string());
        }
        Ok(())
    }

    /// Constructs [`SacConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        log::info!("Load config of SAC agent from {}", path_.to_str().unwrap_or("?"));
        Ok(b)
    }

    /// Saves [`SacConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        log::info!("Save config of SAC agent into {}", path_.to_str().unwrap_or("?"));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        encoder::EncoderConfig,
        heads::{GaussianPolicyConfig, QNetworkConfig},
    };
    use tempdir::TempDir;

    type Config = SacConfig<QNetworkConfig, GaussianPolicyConfig>;

    #[test]
    fn test_yaml_round_trip() -> Result<()> {
        let dir = TempDir::new("sac_config")?;
        let path = dir.path().join("sac.yaml");
        let encoder = EncoderConfig::Vector { dim: 2 };
        let config = Config::default()
            .actor_config(
                GaussianActorConfig::default()
                    .pi_config(GaussianPolicyConfig::new(encoder.clone(), 2)),
            )
            .critic_config(CriticConfig::default().q_config(QNetworkConfig::new(encoder, 2)))
            .ent_coef_mode(EntCoefMode::Fix(0.1))
            .action_space(ActionSpace::new(vec![-2.0, -1.0], vec![2.0, 1.0])?)
            .batch_size(64)
            .tau(0.01);
        config.save(&path)?;
        assert_eq!(Config::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_check_ranges() {
        assert!(Config::default().check().is_ok());
        assert!(Config::default().tau(0.0).check().is_err());
        assert!(Config::default().tau(1.0).check().is_ok());
        assert!(Config::default().tau(1.5).check().is_err());
        assert!(Config::default().discount_factor(1.1).check().is_err());
        assert!(Config::default().batch_size(0).check().is_err());
    }
}
