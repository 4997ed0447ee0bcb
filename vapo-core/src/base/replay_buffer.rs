//! Replay buffer interface.
use anyhow::Result;
use std::path::Path;

/// Interface for buffers that store experiences from environments.
pub trait ExperienceBufferBase {
    /// The type of items stored in the buffer.
    type Item;

    /// Pushes a new experience into the buffer.
    ///
    /// Once the buffer is full, the oldest experience is overwritten.
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Returns the current number of experiences in the buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the buffer holds no experience.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interface for replay buffers that generate batches for training.
pub trait ReplayBufferBase {
    /// Configuration parameters for the replay buffer.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch: TransitionBatch;

    /// Builds a new replay buffer from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Samples a batch of `size` experiences.
    ///
    /// Fails with [`VapoError::InsufficientData`] when fewer than `size`
    /// experiences are stored.
    ///
    /// [`VapoError::InsufficientData`]: crate::error::VapoError::InsufficientData
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;

    /// Maximum number of stored experiences.
    fn capacity(&self) -> usize;

    /// Persists the backing storage, write cursor and occupancy into `dir`.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Restores what [`ReplayBufferBase::save`] wrote into `dir`.
    fn load(&mut self, dir: &Path) -> Result<()>;
}

/// A column-oriented batch of transitions.
pub trait TransitionBatch {
    /// A set of observations in a batch.
    type ObsBatch;

    /// A set of actions in a batch.
    type ActBatch;

    /// Unpack the data `(o_t, a_t, o_t+1, r_t, done_t)`.
    fn unpack(self) -> (Self::ObsBatch, Self::ActBatch, Self::ObsBatch, Vec<f64>, Vec<i8>);

    /// Returns the number of transitions.
    fn len(&self) -> usize;

    /// Returns `o_t`.
    fn obs(&self) -> &Self::ObsBatch;

    /// Returns `a_t`.
    fn act(&self) -> &Self::ActBatch;
}
