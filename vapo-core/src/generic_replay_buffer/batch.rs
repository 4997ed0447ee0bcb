//! Storage of observations and actions, and batches of transitions.
use crate::TransitionBatch;
use anyhow::Result;
use std::path::Path;

/// Column storage of observations or actions.
///
/// A value of this type is either the backing store of a replay buffer,
/// holding `capacity` rows, or a batch of rows taken out of it.
pub trait BatchBase: Sized {
    /// Creates an empty storage with the specified capacity.
    fn new(capacity: usize) -> Self;

    /// Writes the rows of `data` from index `ix`, wrapping around the capacity.
    fn push(&mut self, ix: usize, data: Self) -> Result<()>;

    /// Gathers the rows at the given indices.
    fn sample(&self, ixs: &[usize]) -> Result<Self>;

    /// Writes the backing storage to a file.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restores the backing storage from a file written by [`BatchBase::save`].
    fn load(&mut self, path: &Path) -> Result<()>;
}

/// A batch of transitions `(o_t, a_t, o_t+1, r_t, done_t)`.
pub struct GenericTransitionBatch<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    /// Current observations.
    pub obs: O,

    /// Selected actions.
    pub act: A,

    /// Next observations.
    pub next_obs: O,

    /// Rewards.
    pub reward: Vec<f64>,

    /// Terminal flags.
    pub is_done: Vec<i8>,
}

impl<O, A> TransitionBatch for GenericTransitionBatch<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type ObsBatch = O;
    type ActBatch = A;

    fn unpack(self) -> (O, A, O, Vec<f64>, Vec<i8>) {
        (self.obs, self.act, self.next_obs, self.reward, self.is_done)
    }

    fn len(&self) -> usize {
        self.reward.len()
    }

    fn obs(&self) -> &O {
        &self.obs
    }

    fn act(&self) -> &A {
        &self.act
    }
}
