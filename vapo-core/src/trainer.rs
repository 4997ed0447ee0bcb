//! Train [`Agent`].
mod config;
mod state;
use crate::{
    error::VapoError,
    evaluator::{evaluate, EvalStats},
    record::{Record, RecordValue::Scalar, Recorder},
    Agent, Env, ExperienceBufferBase, ReplayBufferBase, StepProcessor,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::{debug, info, trace};
pub use state::TrainingState;
use std::path::{Path, PathBuf};

const BEST_TRAIN: &str = "best_train.ckpt";
const BEST_EVAL: &str = "best_eval.ckpt";
const LAST: &str = "last.ckpt";

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop and the objects it drives.
///
/// # Training loop
///
/// [`Trainer::learn`] runs environment steps `t = 1..=total_timesteps`:
///
/// 1. Sample a stochastic action from the agent and step the environment.
/// 2. Convert the step into a transition with [`StepProcessor`] and push it
///    into the replay buffer.
/// 3. If the episode did not just terminate, `t > learning_starts` and the
///    buffer holds at least `batch_size` transitions, perform one optimization
///    step. A [`VapoError::InsufficientData`] from the buffer skips the step.
/// 4. Evaluate when due. With a separate evaluation environment this is every
///    `log_interval` steps, otherwise at the end of every
///    `max(1, log_interval / max_episode_length)`-th episode. A new best mean
///    return is saved as `best_eval.ckpt`.
/// 5. At the end of an episode (terminal step or `max_episode_length` steps),
///    record the episode, save `best_train.ckpt` when its return is at least
///    the best one seen, always save `last.ckpt`, then reset the environment.
///
/// A final deterministic evaluation runs after the last step.
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Warmup
///     Warmup --> Training: t > learning_starts
///     Training --> Evaluating: evaluation due
///     Evaluating --> Training
///     Training --> [*]: t == total_timesteps
/// ```
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     A[Agent]-->|Env::Act|B[Env]
///     B -->|Env::Obs|A
///     B -->|"Step&lt;E: Env&gt;"|C[StepProcessor]
///     C -->|ExperienceBufferBase::Item|D[ReplayBufferBase]
///     D -->|TransitionBatch|A
/// ```
///
/// Checkpoints are written into `model_dir`. Next to each checkpoint
/// `<name>.ckpt` the trainer writes its [`TrainingState`] as
/// `<name>.state.yaml`, and the replay buffer goes to the directory
/// `<name>.replay_buffer` when `save_replay_buffer` is set.
pub struct Trainer<E, P, R>
where
    E: Env,
    P: StepProcessor<E>,
    R: ExperienceBufferBase<Item = P::Output> + ReplayBufferBase,
{
    config: TrainerConfig,
    env: E,
    eval_env: Option<E>,
    step_proc: P,
    buffer: R,
    state: TrainingState,
}

impl<E, P, R> Trainer<E, P, R>
where
    E: Env,
    P: StepProcessor<E>,
    R: ExperienceBufferBase<Item = P::Output> + ReplayBufferBase,
{
    /// Constructs a trainer.
    ///
    /// When `eval_env_config` is `None`, evaluation episodes run on the
    /// training environment at episode boundaries.
    pub fn build(
        config: TrainerConfig,
        env_config: &E::Config,
        eval_env_config: Option<&E::Config>,
        step_proc_config: &P::Config,
        replay_buffer_config: &R::Config,
    ) -> Result<Self> {
        let env = E::build(env_config, config.seed)?;
        let eval_env = match eval_env_config {
            Some(c) => Some(E::build(c, config.seed + 1)?),
            None => None,
        };

        Ok(Self {
            env,
            eval_env,
            step_proc: P::build(step_proc_config),
            buffer: R::build(replay_buffer_config),
            state: TrainingState::default(),
            config,
        })
    }

    /// Progress of the run.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// The replay buffer.
    pub fn buffer(&self) -> &R {
        &self.buffer
    }

    /// The training environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Checks the agent against the buffer and the environment.
    pub fn validate<A: Agent<E, R>>(&self, agent: &A) -> Result<()> {
        if agent.batch_size() > self.buffer.capacity() {
            return Err(VapoError::BatchSizeExceedsCapacity {
                batch_size: agent.batch_size(),
                capacity: self.buffer.capacity(),
            }
            .into());
        }

        let env_dim = self.env.action_space().dim();
        if agent.action_dim() != env_dim {
            return Err(VapoError::ActionDimMismatch {
                policy: agent.action_dim(),
                env: env_dim,
            }
            .into());
        }

        Ok(())
    }

    fn log_n_episodes(&self) -> usize {
        let log_interval = self.config.log_interval.max(1);
        match self.config.max_episode_length {
            Some(m) => (log_interval / m.max(1)).max(1),
            None => 1,
        }
    }

    /// Trains the agent until `total_timesteps` environment steps are done.
    ///
    /// After [`Trainer::load`], training continues from the restored
    /// step counter.
    pub fn learn<A, D>(&mut self, agent: &mut A, recorder: &mut D) -> Result<()>
    where
        A: Agent<E, R>,
        D: Recorder,
    {
        self.validate(agent)?;

        let total = self.config.total_timesteps;
        let log_interval = self.config.log_interval.max(1);
        let log_n_ep = self.log_n_episodes();
        let max_ep_len = self.config.max_episode_length;
        let mut last_opt_record: Option<Record> = None;

        agent.train();
        let mut obs = self.env.reset()?;
        self.step_proc.reset(obs.clone())?;
        self.state.reset_episode();

        for t in (self.state.env_steps + 1)..=total {
            let act = agent.sample(&obs)?;
            let (step, env_record) = self.env.step(&act)?;
            let done = step.is_done;
            self.state.episode_return += step.reward;
            self.state.episode_length += 1;
            self.state.env_steps = t;
            obs = step.obs.clone();
            let item = self.step_proc.process(step)?;
            self.buffer.push(item)?;

            let warm = t > self.config.learning_starts;
            if !done && warm && self.buffer.len() >= agent.batch_size() {
                match agent.opt_with_record(&mut self.buffer) {
                    Ok(record) => last_opt_record = Some(record),
                    Err(err) if VapoError::is_insufficient_data(&err) => {
                        trace!("Skipped optimization step at {}: {}", t, err)
                    }
                    Err(err) => return Err(err),
                }
            }

            let end_ep = done || max_ep_len.map_or(false, |m| self.state.episode_length >= m);

            let eval_due = if self.eval_env.is_some() {
                t % log_interval == 0
            } else {
                end_ep && (self.state.episodes + 1) % log_n_ep == 0
            };
            if eval_due {
                self.eval_and_record(agent, recorder, last_opt_record.take())?;
            }

            if end_ep {
                self.on_episode_end(agent, recorder, env_record)?;
                obs = self.env.reset()?;
                self.step_proc.reset(obs.clone())?;
            }
        }

        info!("End of training evaluation:");
        let stats = self.evaluate(agent, max_ep_len, self.config.n_eval_episodes)?;
        for (ix, ret) in stats.returns.iter().enumerate() {
            info!("Episode {}, Return: {:.3}", ix, ret);
        }
        recorder.flush();

        Ok(())
    }

    /// Runs deterministic evaluation episodes.
    ///
    /// The separate evaluation environment is used when configured, the
    /// training environment otherwise. The agent is put back into its previous
    /// mode afterwards.
    pub fn evaluate<A: Agent<E, R>>(
        &mut self,
        agent: &mut A,
        max_episode_length: Option<usize>,
        n_episodes: usize,
    ) -> Result<EvalStats> {
        let was_train = agent.is_train();
        agent.eval();
        let env = self.eval_env.as_mut().unwrap_or(&mut self.env);
        let stats = evaluate(env, agent, max_episode_length, n_episodes);
        if was_train {
            agent.train();
        }
        let stats = stats?;

        info!(
            "Mean return: {:.3} +/- {:.3}, Mean length: {:.3} +/- {:.3}, over {} episodes",
            stats.mean_return,
            stats.std_return,
            stats.mean_length,
            stats.std_length,
            stats.n_episodes()
        );
        Ok(stats)
    }

    fn eval_and_record<A, D>(
        &mut self,
        agent: &mut A,
        recorder: &mut D,
        opt_record: Option<Record>,
    ) -> Result<()>
    where
        A: Agent<E, R>,
        D: Recorder,
    {
        let stats = self.evaluate(
            agent,
            self.config.max_episode_length,
            self.config.n_eval_episodes,
        )?;

        let mut record = stats.to_record();
        record.insert("env_steps", Scalar(self.state.env_steps as f32));
        if let Some(r) = opt_record {
            record.merge_inplace(r.with_prefix("train"));
        }
        recorder.write(record);

        let improved = !stats.mean_return.is_nan()
            && self
                .state
                .best_eval_return
                .map_or(true, |best| stats.mean_return > best);
        if improved {
            self.state.best_eval_return = Some(stats.mean_return);
            info!("New best eval {:.3}", stats.mean_return);
            self.save_in_model_dir(agent, BEST_EVAL)?;
        }

        Ok(())
    }

    fn on_episode_end<A, D>(
        &mut self,
        agent: &mut A,
        recorder: &mut D,
        env_record: Record,
    ) -> Result<()>
    where
        A: Agent<E, R>,
        D: Recorder,
    {
        self.state.episodes += 1;
        let (ret, len) = (self.state.episode_return, self.state.episode_length);
        info!(
            "Episode {}: env_steps {}/{}, return {:.3}, length {}",
            self.state.episodes,
            self.state.env_steps,
            self.config.total_timesteps,
            ret,
            len
        );

        let mut record = env_record.with_prefix("env");
        record.insert("env_steps", Scalar(self.state.env_steps as f32));
        record.insert("train/episode_return", Scalar(ret as f32));
        record.insert("train/episode_length", Scalar(len as f32));
        recorder.write(record);

        if self.state.best_train_return.map_or(true, |best| ret >= best) {
            self.state.best_train_return = Some(ret);
            self.save_in_model_dir(agent, BEST_TRAIN)?;
        }
        self.save_in_model_dir(agent, LAST)?;
        self.state.reset_episode();

        Ok(())
    }

    fn save_in_model_dir<A: Agent<E, R>>(&self, agent: &A, name: &str) -> Result<()> {
        if let Some(model_dir) = &self.config.model_dir {
            self.save(agent, model_dir.join(name))?;
        }
        Ok(())
    }

    fn state_path(path: &Path) -> PathBuf {
        path.with_extension("state.yaml")
    }

    fn buffer_dir(path: &Path) -> PathBuf {
        path.with_extension("replay_buffer")
    }

    /// Saves the agent and the training state into `path`.
    ///
    /// The replay buffer is saved into the sibling directory
    /// `<name>.replay_buffer` when `save_replay_buffer` is set, so every
    /// checkpoint keeps the buffer contents of the moment it was written.
    pub fn save<A: Agent<E, R>>(&self, agent: &A, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        agent.save_params(path)?;
        self.state.save(&Self::state_path(path))?;
        if self.config.save_replay_buffer {
            self.buffer.save(&Self::buffer_dir(path))?;
        }
        debug!("Saved checkpoint {:?}", path);
        Ok(())
    }

    /// Restores what [`Trainer::save`] wrote.
    ///
    /// Fails with [`VapoError::CheckpointNotFound`] when `path` is missing.
    /// The training state and the replay buffer are restored if they exist.
    pub fn load<A: Agent<E, R>>(&mut self, agent: &mut A, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VapoError::CheckpointNotFound(path.to_path_buf()).into());
        }
        agent.load_params(path)?;

        let state_path = Self::state_path(path);
        if state_path.is_file() {
            self.state = TrainingState::load(&state_path)?;
        }

        let buffer_dir = Self::buffer_dir(path);
        if buffer_dir.is_dir() {
            self.buffer.load(&buffer_dir)?;
            info!("Restored replay buffer with {} transitions", self.buffer.len());
        }

        info!(
            "Loaded checkpoint {:?} at env_steps {}, episode {}",
            path, self.state.env_steps, self.state.episodes
        );
        Ok(())
    }
}
