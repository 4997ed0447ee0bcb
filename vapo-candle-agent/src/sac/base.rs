use super::{
    checkpoint::ModelState,
    critic::{CRITIC_1, CRITIC_2},
    EntCoef, GaussianActor, SacCheckpoint, SacConfig, TwinCritic, CHECKPOINT_VERSION,
};
use crate::{
    model::{SubModel1, SubModel2},
    util::{check_compatible, named_tensors, restore, scalar, NamedTensors, OutDim},
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::loss::mse;
use log::trace;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, marker::PhantomData, path::Path};
use vapo_core::{
    error::VapoError,
    record::{Record, RecordValue},
    ActionSpace, Agent, Configurable, Env, Policy, ReplayBufferBase, TransitionBatch,
};

/// Soft actor critic (SAC) agent.
///
/// One call of [`Agent::opt_with_record`] samples a batch, updates both
/// critics toward the soft Bellman target computed with the target critics,
/// updates the actor with reparametrized actions, updates the entropy
/// coefficient and soft-updates the target critics.
pub struct Sac<E, Q, P, R>
where
    E: Env,
    Q: SubModel2<Input1 = P::Input, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Output = (Tensor, Tensor)>,
    R: ReplayBufferBase,
    E::Obs: Into<P::Input>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    <R::Batch as TransitionBatch>::ObsBatch: TryInto<P::Input, Error = anyhow::Error>,
    <R::Batch as TransitionBatch>::ActBatch: TryInto<Tensor, Error = anyhow::Error>,
{
    critic: TwinCritic<Q>,
    pi: GaussianActor<P>,
    ent_coef: EntCoef,
    gamma: f64,
    tau: f64,
    batch_size: usize,
    reward_scale: f32,
    train: bool,
    n_opts: usize,
    device: Device,
    phantom: PhantomData<(E, R)>,
}

impl<E, Q, P, R> Sac<E, Q, P, R>
where
    E: Env,
    Q: SubModel2<Input1 = P::Input, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Output = (Tensor, Tensor)>,
    R: ReplayBufferBase,
    E::Obs: Into<P::Input>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    <R::Batch as TransitionBatch>::ObsBatch: TryInto<P::Input, Error = anyhow::Error>,
    <R::Batch as TransitionBatch>::ActBatch: TryInto<Tensor, Error = anyhow::Error>,
{
    fn column(&self, xs: Vec<f32>) -> Result<Tensor> {
        let n = xs.len();
        Ok(Tensor::from_vec(xs, (n,), &self.device)?)
    }

    /// Returns the critic loss.
    fn update_critic(
        &mut self,
        obs: &P::Input,
        act: &Tensor,
        next_obs: &P::Input,
        reward: Vec<f64>,
        is_done: Vec<i8>,
    ) -> Result<f32> {
        let reward = self.column(reward.iter().map(|r| *r as f32).collect())?;
        let not_done = self.column(is_done.iter().map(|d| 1.0 - *d as f32).collect())?;

        let tgt = {
            let (next_a, next_logp) = self.pi.act(next_obs, false, false)?;
            let next_q = self.critic.min_tgt(next_obs, &next_a)?;
            let alpha = self.ent_coef.alpha()?;
            let next_v = (next_q - alpha.broadcast_mul(&next_logp)?)?;
            ((reward * self.reward_scale as f64)? + ((not_done * self.gamma)? * next_v)?)?
        }
        .detach();

        let (q1, q2) = self.critic.forward(obs, act)?;
        debug_assert_eq!(q1.dims(), tgt.dims());
        let loss = (mse(&q1, &tgt)? + mse(&q2, &tgt)?)?;
        self.critic.backward_step(&loss)?;
        scalar(&loss)
    }

    /// Returns the actor loss and the log probabilities of the sampled actions.
    fn update_actor(&mut self, obs: &P::Input) -> Result<(f32, Tensor)> {
        let (a, logp) = self.pi.act(obs, false, true)?;
        let q = self.critic.min(obs, &a)?;
        let alpha = self.ent_coef.alpha()?;
        let loss = (alpha.broadcast_mul(&logp)? - q)?.mean_all()?;
        self.pi.backward_step(&loss)?;
        Ok((scalar(&loss)?, logp.detach()))
    }

    fn opt_(&mut self, buffer: &mut R) -> Result<Record> {
        trace!("batch()");
        let batch = buffer.batch(self.batch_size)?;
        let (obs, act, next_obs, reward, is_done) = batch.unpack();
        let obs: P::Input = obs.try_into()?;
        let act: Tensor = act.try_into()?;
        let act = act.to_device(&self.device)?.to_dtype(DType::F32)?;
        let next_obs: P::Input = next_obs.try_into()?;

        trace!("update_critic()");
        let critic_loss = self.update_critic(&obs, &act, &next_obs, reward, is_done)?;

        trace!("update_actor()");
        let (actor_loss, logp) = self.update_actor(&obs)?;

        trace!("update_ent_coef()");
        let ent_coef_loss = self.ent_coef.update(&logp)?;

        trace!("soft_update()");
        self.critic.soft_update(self.tau)?;
        self.n_opts += 1;

        Ok(Record::from_slice(&[
            ("critic_loss", RecordValue::Scalar(critic_loss)),
            ("actor_loss", RecordValue::Scalar(actor_loss)),
            ("ent_coef", RecordValue::Scalar(self.ent_coef.alpha_value()?)),
            ("ent_coef_loss", RecordValue::Scalar(ent_coef_loss)),
        ]))
    }

    /// Copies the learnable state.
    pub fn checkpoint(&self) -> Result<SacCheckpoint> {
        let critic_1 = format!("{}.", CRITIC_1);
        let critic_2 = format!("{}.", CRITIC_2);
        Ok(SacCheckpoint {
            version: CHECKPOINT_VERSION,
            n_opts: self.n_opts,
            actor: ModelState {
                params: named_tensors(self.pi.varmap(), "")?,
                opt: self.pi.opt().state()?,
            },
            critic_1: named_tensors(self.critic.varmap(), &critic_1)?,
            critic_1_target: named_tensors(self.critic.varmap_tgt(), &critic_1)?,
            critic_2: named_tensors(self.critic.varmap(), &critic_2)?,
            critic_2_target: named_tensors(self.critic.varmap_tgt(), &critic_2)?,
            critics_opt: self.critic.opt().state()?,
            ent_coef: self.ent_coef.state()?,
        })
    }

    /// Restores the learnable state.
    ///
    /// Every part is checked against the networks before anything is
    /// overwritten, so a failing restore leaves the agent unchanged.
    pub fn restore(&mut self, ckpt: &SacCheckpoint) -> Result<()> {
        let join = |a: &NamedTensors, b: &NamedTensors| -> NamedTensors {
            a.iter().chain(b.iter()).map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let critic = join(&ckpt.critic_1, &ckpt.critic_2);
        let critic_tgt = join(&ckpt.critic_1_target, &ckpt.critic_2_target);

        check_compatible(self.pi.varmap(), &ckpt.actor.params, "actor")?;
        self.pi.opt().check_compatible(&ckpt.actor.opt, "actor")?;
        check_compatible(self.critic.varmap(), &critic, "critic")?;
        check_compatible(self.critic.varmap_tgt(), &critic_tgt, "target critic")?;
        self.critic.opt().check_compatible(&ckpt.critics_opt, "critic")?;
        self.ent_coef.check_compatible(&ckpt.ent_coef)?;

        restore(self.pi.varmap(), &ckpt.actor.params)?;
        self.pi.opt_mut().load_state(&ckpt.actor.opt)?;
        restore(self.critic.varmap(), &critic)?;
        restore(self.critic.varmap_tgt(), &critic_tgt)?;
        self.critic.opt_mut().load_state(&ckpt.critics_opt)?;
        self.ent_coef.load_state(&ckpt.ent_coef)?;
        self.n_opts = ckpt.n_opts;
        Ok(())
    }

    /// Returns the entropy coefficient.
    pub fn ent_coef(&self) -> &EntCoef {
        &self.ent_coef
    }

    /// Returns the actor.
    pub fn actor(&self) -> &GaussianActor<P> {
        &self.pi
    }
}

impl<E, Q, P, R> Policy<E> for Sac<E, Q, P, R>
where
    E: Env,
    Q: SubModel2<Input1 = P::Input, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Output = (Tensor, Tensor)>,
    R: ReplayBufferBase,
    E::Obs: Into<P::Input>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    <R::Batch as TransitionBatch>::ObsBatch: TryInto<P::Input, Error = anyhow::Error>,
    <R::Batch as TransitionBatch>::ActBatch: TryInto<Tensor, Error = anyhow::Error>,
{
    /// Samples a stochastic action in training mode and the squashed mean otherwise.
    fn sample(&mut self, obs: &E::Obs) -> Result<E::Act> {
        let obs = obs.clone().into();
        let (act, _) = self.pi.act(&obs, !self.train, false)?;
        Ok(act.detach().into())
    }
}

impl<E, Q, P, R> Configurable<E> for Sac<E, Q, P, R>
where
    E: Env,
    Q: SubModel2<Input1 = P::Input, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Output = (Tensor, Tensor)>,
    R: ReplayBufferBase,
    E::Obs: Into<P::Input>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    <R::Batch as TransitionBatch>::ObsBatch: TryInto<P::Input, Error = anyhow::Error>,
    <R::Batch as TransitionBatch>::ActBatch: TryInto<Tensor, Error = anyhow::Error>,
{
    type Config = SacConfig<Q::Config, P::Config>;

    /// Constructs [`Sac`] agent.
    fn build(config: Self::Config) -> Result<Self> {
        config.check()?;
        let device = config.device.build()?;
        let out_dim = config
            .actor_config
            .pi_config
            .as_ref()
            .map(|c| c.get_out_dim())
            .ok_or_else(|| VapoError::InvalidConfig("pi_config is not set".to_string()))?;
        let action_space = config
            .action_space
            .clone()
            .unwrap_or_else(|| ActionSpace::symmetric(out_dim));
        let pi = GaussianActor::build(config.actor_config, &action_space, device.clone())?;
        let critic = TwinCritic::build(config.critic_config, &device)?;
        let ent_coef = EntCoef::new(config.ent_coef_mode, out_dim, &device)?;

        Ok(Sac {
            critic,
            pi,
            ent_coef,
            gamma: config.gamma,
            tau: config.tau,
            batch_size: config.batch_size,
            reward_scale: config.reward_scale,
            train: config.train,
            n_opts: 0,
            device,
            phantom: PhantomData,
        })
    }
}

impl<E, Q, P, R> Agent<E, R> for Sac<E, Q, P, R>
where
    E: Env,
    Q: SubModel2<Input1 = P::Input, Input2 = Tensor, Output = Tensor>,
    P: SubModel1<Output = (Tensor, Tensor)>,
    R: ReplayBufferBase,
    E::Obs: Into<P::Input>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    <R::Batch as TransitionBatch>::ObsBatch: TryInto<P::Input, Error = anyhow::Error>,
    <R::Batch as TransitionBatch>::ActBatch: TryInto<Tensor, Error = anyhow::Error>,
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
        self.opt_(buffer)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn action_dim(&self) -> usize {
        self.pi.out_dim()
    }

    fn n_opts(&self) -> usize {
        self.n_opts
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        self.checkpoint()?.save(path)
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        let ckpt = SacCheckpoint::load(path)?;
        self.restore(&ckpt)
    }
}
