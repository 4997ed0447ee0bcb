//! Evaluate [`Policy`].
use crate::{
    record::{Record, RecordValue},
    util::mean_std,
    Env, Policy,
};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::{evaluate, DefaultEvaluator};

/// Returns and lengths of a batch of evaluation episodes.
#[derive(Debug, Clone)]
pub struct EvalStats {
    /// Return of each completed episode.
    pub returns: Vec<f64>,

    /// Length of each completed episode.
    pub lengths: Vec<usize>,

    /// Mean of `returns`, NaN when no episode completed.
    pub mean_return: f64,

    /// Population standard deviation of `returns`.
    pub std_return: f64,

    /// Mean of `lengths`.
    pub mean_length: f64,

    /// Population standard deviation of `lengths`.
    pub std_length: f64,
}

impl EvalStats {
    /// Computes the statistics of the given episodes.
    pub fn new(returns: Vec<f64>, lengths: Vec<usize>) -> Self {
        let (mean_return, std_return) = mean_std(&returns);
        let lens: Vec<f64> = lengths.iter().map(|&l| l as f64).collect();
        let (mean_length, std_length) = mean_std(&lens);
        Self {
            returns,
            lengths,
            mean_return,
            std_return,
            mean_length,
            std_length,
        }
    }

    /// Number of episodes that ran to the end.
    pub fn n_episodes(&self) -> usize {
        self.returns.len()
    }

    /// Converts the statistics into a record with keys prefixed by `eval/`.
    pub fn to_record(&self) -> Record {
        Record::from_slice(&[
            ("mean_return", RecordValue::Scalar(self.mean_return as f32)),
            ("std_return", RecordValue::Scalar(self.std_return as f32)),
            ("mean_ep_length", RecordValue::Scalar(self.mean_length as f32)),
            ("std_ep_length", RecordValue::Scalar(self.std_length as f32)),
        ])
        .with_prefix("eval")
    }
}

/// Evaluate [`Policy`].
pub trait Evaluator<E: Env> {
    /// Runs evaluation episodes with the given policy.
    ///
    /// The caller of this method needs to handle the internal state of `policy`,
    /// like training/evaluation mode.
    fn evaluate<P>(&mut self, policy: &mut P) -> Result<EvalStats>
    where
        P: Policy<E>;
}
