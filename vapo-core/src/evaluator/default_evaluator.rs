use super::{EvalStats, Evaluator};
use crate::{Env, Policy};
use anyhow::Result;
use log::{debug, warn};

/// Runs a fixed number of episodes on its own environment.
pub struct DefaultEvaluator<E: Env> {
    n_episodes: usize,
    max_episode_length: Option<usize>,
    env: E,
}

impl<E: Env> DefaultEvaluator<E> {
    /// Constructs a new [`DefaultEvaluator`].
    ///
    /// Episodes are truncated after `max_episode_length` steps when given.
    pub fn new(
        config: &E::Config,
        seed: i64,
        n_episodes: usize,
        max_episode_length: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            n_episodes,
            max_episode_length,
            env: E::build(config, seed)?,
        })
    }
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<P>(&mut self, policy: &mut P) -> Result<EvalStats>
    where
        P: Policy<E>,
    {
        evaluate(
            &mut self.env,
            policy,
            self.max_episode_length,
            self.n_episodes,
        )
    }
}

fn run_episode<E, P>(
    env: &mut E,
    policy: &mut P,
    max_episode_length: Option<usize>,
) -> Result<(f64, usize)>
where
    E: Env,
    P: Policy<E>,
{
    let mut obs = env.reset()?;
    let (mut ret, mut len) = (0f64, 0usize);
    while max_episode_length.map_or(true, |m| len < m) {
        let act = policy.sample(&obs)?;
        let (step, _) = env.step(&act)?;
        ret += step.reward;
        len += 1;
        if step.is_done {
            break;
        }
        obs = step.obs;
    }
    Ok((ret, len))
}

/// Runs `n_episodes` episodes of `policy` on `env`.
///
/// An episode whose reset or step fails is reported and left out of the
/// statistics. When every episode fails, the means are NaN.
pub fn evaluate<E, P>(
    env: &mut E,
    policy: &mut P,
    max_episode_length: Option<usize>,
    n_episodes: usize,
) -> Result<EvalStats>
where
    E: Env,
    P: Policy<E>,
{
    let mut returns = Vec::with_capacity(n_episodes);
    let mut lengths = Vec::with_capacity(n_episodes);

    for ix in 0..n_episodes {
        match run_episode(env, policy, max_episode_length) {
            Ok((ret, len)) => {
                debug!("Evaluation episode {}: return {:.3}, length {}", ix, ret, len);
                returns.push(ret);
                lengths.push(len);
            }
            Err(err) => warn!("Evaluation episode {} skipped: {:#}", ix, err),
        }
    }

    Ok(EvalStats::new(returns, lengths))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{CountingEnv, CountingEnvConfig, MockAgent};

    #[test]
    fn test_truncated_episodes() -> Result<()> {
        let config = CountingEnvConfig {
            episode_len: 10,
            fail_at: None,
        };
        let mut evaluator = DefaultEvaluator::<CountingEnv>::new(&config, 0, 3, Some(4))?;
        let stats = evaluator.evaluate(&mut MockAgent::new(1))?;
        assert_eq!(stats.lengths, vec![4, 4, 4]);
        assert_eq!(stats.mean_return, 4.0);
        assert_eq!(stats.std_return, 0.0);
        Ok(())
    }

    #[test]
    fn test_failed_episode_is_skipped() -> Result<()> {
        let config = CountingEnvConfig {
            episode_len: 3,
            fail_at: Some(5),
        };
        let mut env = CountingEnv::build(&config, 0)?;
        let stats = evaluate(&mut env, &mut MockAgent::new(1), None, 3)?;
        assert_eq!(stats.n_episodes(), 2);
        assert_eq!(stats.mean_length, 3.0);
        Ok(())
    }

    #[test]
    fn test_all_failed() -> Result<()> {
        let config = CountingEnvConfig {
            episode_len: 3,
            fail_at: Some(1),
        };
        let mut env = CountingEnv::build(&config, 0)?;
        let stats = evaluate(&mut env, &mut MockAgent::new(1), None, 1)?;
        assert_eq!(stats.n_episodes(), 0);
        assert!(stats.mean_return.is_nan());
        Ok(())
    }
}
