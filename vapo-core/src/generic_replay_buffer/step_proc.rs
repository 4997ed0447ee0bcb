//! Conversion of environment steps into transitions.
use super::{BatchBase, GenericTransitionBatch};
use crate::{Env, Step, StepProcessor};
use anyhow::{anyhow, Result};
use std::{convert::TryFrom, marker::PhantomData};

/// Configuration of [`SimpleStepProcessor`].
#[derive(Clone, Debug, Default)]
pub struct SimpleStepProcessorConfig {}

/// Builds one-step transitions `(o_t, a_t, r_t, o_t+1, done_t)`.
///
/// The processor keeps `o_t` between calls. It must be reset with the
/// first observation of every episode.
pub struct SimpleStepProcessor<E, O, A> {
    prev_obs: Option<O>,
    phantom: PhantomData<(E, A)>,
}

impl<E, O, A> StepProcessor<E> for SimpleStepProcessor<E, O, A>
where
    E: Env,
    O: BatchBase + TryFrom<E::Obs>,
    A: BatchBase + TryFrom<E::Act>,
    <O as TryFrom<E::Obs>>::Error: Into<anyhow::Error>,
    <A as TryFrom<E::Act>>::Error: Into<anyhow::Error>,
{
    type Config = SimpleStepProcessorConfig;
    type Output = GenericTransitionBatch<O, A>;

    fn build(_config: &Self::Config) -> Self {
        Self {
            prev_obs: None,
            phantom: PhantomData,
        }
    }

    fn reset(&mut self, init_obs: E::Obs) -> Result<()> {
        let obs = O::try_from(init_obs).map_err(Into::<anyhow::Error>::into)?;
        self.prev_obs = Some(obs);
        Ok(())
    }

    fn process(&mut self, step: Step<E>) -> Result<Self::Output> {
        let next_obs = O::try_from(step.obs.clone()).map_err(Into::<anyhow::Error>::into)?;
        let stored_next_obs = O::try_from(step.obs).map_err(Into::<anyhow::Error>::into)?;
        let obs = self
            .prev_obs
            .replace(stored_next_obs)
            .ok_or_else(|| anyhow!("prev_obs is not set. Forgot to call reset()?"))?;
        let act = A::try_from(step.act).map_err(Into::<anyhow::Error>::into)?;

        Ok(GenericTransitionBatch {
            obs,
            act,
            next_obs,
            reward: vec![step.reward],
            is_done: vec![step.is_done as i8],
        })
    }
}
