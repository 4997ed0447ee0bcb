//! Replay buffer shared between rollout workers and a learner.
use crate::{ExperienceBufferBase, ReplayBufferBase};
use anyhow::{anyhow, Result};
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

/// A cloneable handle to a replay buffer guarded by a mutex.
///
/// Every insert holds the lock for the whole slot commit and every batch draw
/// holds it for the whole copy, so a sampled batch is a snapshot that
/// concurrent inserts cannot tear.
pub struct SharedReplayBuffer<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for SharedReplayBuffer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> SharedReplayBuffer<R> {
    /// Wraps a replay buffer.
    pub fn new(buffer: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, R>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("replay buffer lock is poisoned"))
    }

    fn lock_or_recover(&self) -> MutexGuard<'_, R> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<R> ExperienceBufferBase for SharedReplayBuffer<R>
where
    R: ExperienceBufferBase,
{
    type Item = R::Item;

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        self.lock()?.push(tr)
    }

    fn len(&self) -> usize {
        self.lock_or_recover().len()
    }
}

impl<R> ReplayBufferBase for SharedReplayBuffer<R>
where
    R: ReplayBufferBase,
{
    type Config = R::Config;
    type Batch = R::Batch;

    fn build(config: &Self::Config) -> Self {
        Self::new(R::build(config))
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        self.lock()?.batch(size)
    }

    fn capacity(&self) -> usize {
        self.lock_or_recover().capacity()
    }

    fn save(&self, dir: &Path) -> Result<()> {
        self.lock()?.save(dir)
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        self.lock()?.load(dir)
    }
}
