//! Environment, agent and storage stand-ins used by tests.
use crate::{
    error::VapoError,
    generic_replay_buffer::{BatchBase, GenericTransitionBatch},
    record::{Record, RecordValue},
    util::atomic_write,
    Act, ActionSpace, Agent, Env, Obs, ObsSpace, Policy, ReplayBufferBase, Step,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Scalar column storage.
#[derive(Clone, Debug, PartialEq)]
pub struct VecBatch(pub Vec<f32>);

impl BatchBase for VecBatch {
    fn new(capacity: usize) -> Self {
        Self(vec![0.0; capacity])
    }

    fn push(&mut self, ix: usize, data: Self) -> Result<()> {
        let capacity = self.0.len();
        for (k, v) in data.0.into_iter().enumerate() {
            self.0[(ix + k) % capacity] = v;
        }
        Ok(())
    }

    fn sample(&self, ixs: &[usize]) -> Result<Self> {
        Ok(Self(ixs.iter().map(|&ix| self.0[ix]).collect()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, &bincode::serialize(&self.0)?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.0 = bincode::deserialize(&fs::read(path)?)?;
        Ok(())
    }
}

/// A transition labelled by `label` in every column.
pub fn transition(label: f32) -> GenericTransitionBatch<VecBatch, VecBatch> {
    GenericTransitionBatch {
        obs: VecBatch(vec![label]),
        act: VecBatch(vec![label]),
        next_obs: VecBatch(vec![label + 0.5]),
        reward: vec![label as f64],
        is_done: vec![0],
    }
}

#[derive(Clone, Debug)]
pub struct CountObs(pub f32);

impl Obs for CountObs {}

impl From<CountObs> for VecBatch {
    fn from(obs: CountObs) -> Self {
        VecBatch(vec![obs.0])
    }
}

#[derive(Clone, Debug)]
pub struct CountAct(pub f32);

impl Act for CountAct {
    fn len(&self) -> usize {
        1
    }
}

impl From<CountAct> for VecBatch {
    fn from(act: CountAct) -> Self {
        VecBatch(vec![act.0])
    }
}

#[derive(Clone, Debug)]
pub struct CountingEnvConfig {
    /// Steps after which an episode terminates.
    pub episode_len: usize,

    /// Step index at which `step` fails, if any.
    pub fail_at: Option<usize>,
}

/// Emits reward 1 per step and terminates after `episode_len` steps.
pub struct CountingEnv {
    config: CountingEnvConfig,
    t: usize,
    total_steps: usize,
    pub n_resets: usize,
    action_space: ActionSpace,
    obs_space: ObsSpace,
}

impl Env for CountingEnv {
    type Config = CountingEnvConfig;
    type Obs = CountObs;
    type Act = CountAct;
    type Info = ();

    fn build(config: &Self::Config, _seed: i64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            t: 0,
            total_steps: 0,
            n_resets: 0,
            action_space: ActionSpace::symmetric(1),
            obs_space: ObsSpace::Vector { dim: 1 },
        })
    }

    fn reset(&mut self) -> Result<CountObs> {
        self.t = 0;
        self.n_resets += 1;
        Ok(CountObs(0.0))
    }

    fn step(&mut self, a: &CountAct) -> Result<(Step<Self>, Record)> {
        self.total_steps += 1;
        if Some(self.total_steps) == self.config.fail_at {
            anyhow::bail!("simulator crashed");
        }
        self.t += 1;
        let is_done = self.t >= self.config.episode_len;
        let step = Step::new(CountObs(self.t as f32), a.clone(), 1.0, is_done, ());
        Ok((step, Record::empty()))
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn observation_space(&self) -> &ObsSpace {
        &self.obs_space
    }
}

#[derive(Serialize, Deserialize)]
struct MockParams {
    n_opts: usize,
}

/// Counts optimization steps and the buffer occupancy seen by each of them.
pub struct MockAgent {
    pub batch_size: usize,
    pub action_dim: usize,
    pub n_opts: usize,
    pub occupancy_at_opt: Vec<usize>,
    train: bool,
}

impl MockAgent {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            action_dim: 1,
            n_opts: 0,
            occupancy_at_opt: vec![],
            train: true,
        }
    }
}

impl Policy<CountingEnv> for MockAgent {
    fn sample(&mut self, _obs: &CountObs) -> Result<CountAct> {
        Ok(CountAct(0.0))
    }
}

impl<R> Agent<CountingEnv, R> for MockAgent
where
    R: ReplayBufferBase + crate::ExperienceBufferBase,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt_with_record(&mut self, buffer: &mut R) -> Result<Record> {
        let _batch = buffer.batch(self.batch_size)?;
        self.n_opts += 1;
        self.occupancy_at_opt.push(buffer.len());
        Ok(Record::from_slice(&[
            ("critic_loss", RecordValue::Scalar(0.0)),
            ("actor_loss", RecordValue::Scalar(0.0)),
        ]))
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn n_opts(&self) -> usize {
        self.n_opts
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        let params = MockParams {
            n_opts: self.n_opts,
        };
        atomic_write(path, serde_yaml::to_string(&params)?.as_bytes())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(VapoError::CheckpointNotFound(path.to_path_buf()).into());
        }
        let params: MockParams = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        self.n_opts = params.n_opts;
        Ok(())
    }
}
