//! Deterministic toy environment for tests and demos.
//!
//! An episode draws a goal in `[-0.8, 0.8]^dim` and shows it as the
//! observation. Every step is rewarded with `-||a - goal||^2`, and the
//! episode terminates after `episode_len` steps.
use crate::{ObsTensors, TensorAct};
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use vapo_core::{
    error::VapoError,
    record::{Record, RecordValue},
    ActionSpace, Env, ObsSpace, Step,
};

const GOAL_RANGE: f32 = 0.8;

/// Configuration of [`PointReach`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointReachConfig {
    /// Dimension of observations and actions.
    pub dim: usize,

    /// Number of steps of an episode.
    pub episode_len: usize,
}

impl Default for PointReachConfig {
    fn default() -> Self {
        Self {
            dim: 2,
            episode_len: 10,
        }
    }
}

impl PointReachConfig {
    /// Sets the dimension.
    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    /// Sets the episode length.
    pub fn episode_len(mut self, episode_len: usize) -> Self {
        self.episode_len = episode_len;
        self
    }

    /// Constructs [`PointReachConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PointReachConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Reach a goal point in one move.
pub struct PointReach {
    config: PointReachConfig,
    rng: StdRng,
    goal: Vec<f32>,
    t: usize,
    action_space: ActionSpace,
    obs_space: ObsSpace,
}

impl PointReach {
    fn obs(&self) -> Result<ObsTensors> {
        let t = Tensor::from_slice(&self.goal, (1, self.config.dim), &Device::Cpu)?;
        Ok(ObsTensors::vector(t))
    }

    /// Goal of the current episode.
    pub fn goal(&self) -> &[f32] {
        &self.goal
    }
}

impl Env for PointReach {
    type Config = PointReachConfig;
    type Obs = ObsTensors;
    type Act = TensorAct;
    type Info = ();

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        if config.dim == 0 || config.episode_len == 0 {
            return Err(VapoError::InvalidConfig(format!(
                "point reach needs positive dim and episode_len, got {:?}",
                config
            ))
            .into());
        }
        Ok(Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(seed as u64),
            goal: vec![0.0; config.dim],
            t: 0,
            action_space: ActionSpace::symmetric(config.dim),
            obs_space: ObsSpace::Vector { dim: config.dim },
        })
    }

    fn reset(&mut self) -> Result<ObsTensors> {
        self.t = 0;
        let (rng, dim) = (&mut self.rng, self.config.dim);
        self.goal = (0..dim)
            .map(|_| rng.gen_range(-GOAL_RANGE..GOAL_RANGE))
            .collect();
        self.obs()
    }

    fn step(&mut self, a: &TensorAct) -> Result<(Step<Self>, Record)> {
        let act = a.0.to_device(&Device::Cpu)?.flatten_all()?.to_vec1::<f32>()?;
        if act.len() != self.config.dim {
            return Err(anyhow!(
                "action of dimension {} given to point reach of dimension {}",
                act.len(),
                self.config.dim
            ));
        }
        let dist2 = act
            .iter()
            .zip(&self.goal)
            .map(|(a, g)| (a - g).powi(2))
            .sum::<f32>();
        self.t += 1;
        let is_done = self.t >= self.config.episode_len;
        let step = Step::new(self.obs()?, a.clone(), -dist2 as f64, is_done, ());
        let record = Record::from_slice(&[("distance", RecordValue::Scalar(dist2.sqrt()))]);
        Ok((step, record))
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn observation_space(&self) -> &ObsSpace {
        &self.obs_space
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reward_and_termination() -> Result<()> {
        let mut env = PointReach::build(&PointReachConfig::default().episode_len(3), 0)?;
        let obs = env.reset()?;
        let goal = obs.get(ObsTensors::VECTOR)?.to_vec2::<f32>()?[0].clone();
        assert_eq!(goal, env.goal().to_vec());
        assert!(goal.iter().all(|g| g.abs() <= GOAL_RANGE));

        let at_goal = TensorAct(Tensor::from_slice(&goal, (1, 2), &Device::Cpu)?);
        let (step, _) = env.step(&at_goal)?;
        assert_eq!(step.reward, 0.0);
        assert!(!step.is_done);

        let origin = TensorAct(Tensor::zeros((1, 2), candle_core::DType::F32, &Device::Cpu)?);
        let (step, _) = env.step(&origin)?;
        let expected = -(goal[0].powi(2) + goal[1].powi(2)) as f64;
        assert!((step.reward - expected).abs() < 1e-6);
        let (step, _) = env.step(&origin)?;
        assert!(step.is_done);
        Ok(())
    }

    #[test]
    fn test_same_seed_same_goals() -> Result<()> {
        let config = PointReachConfig::default();
        let mut env1 = PointReach::build(&config, 7)?;
        let mut env2 = PointReach::build(&config, 7)?;
        for _ in 0..3 {
            env1.reset()?;
            env2.reset()?;
            assert_eq!(env1.goal(), env2.goal());
        }
        Ok(())
    }
}
