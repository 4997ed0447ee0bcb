//! Fixed-capacity circular replay buffer.
use super::{BatchBase, GenericTransitionBatch, SimpleReplayBufferConfig};
use crate::{
    error::VapoError,
    util::{atomic_write, replace_dir},
    ExperienceBufferBase, ReplayBufferBase,
};
use anyhow::Result;
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

const META_FILE: &str = "meta.bin";
const OBS_FILE: &str = "obs.bin";
const ACT_FILE: &str = "act.bin";
const NEXT_OBS_FILE: &str = "next_obs.bin";

/// Cursor, occupancy and scalar columns of a persisted buffer.
#[derive(Serialize, Deserialize)]
struct BufferMeta {
    capacity: usize,
    cursor: usize,
    size: usize,
    reward: Vec<f64>,
    is_done: Vec<i8>,
}

/// A replay buffer holding at most `capacity` transitions.
///
/// Inserts write at the cursor and advance it modulo the capacity, so once the
/// buffer is full the oldest transition is overwritten. Batches are drawn
/// uniformly with replacement over the occupied slots.
pub struct SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    capacity: usize,

    /// Write cursor.
    i: usize,

    /// Occupancy.
    size: usize,
    obs: O,
    act: A,
    next_obs: O,
    reward: Vec<f64>,
    is_done: Vec<i8>,
    rng: StdRng,
}

impl<O, A> SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    #[inline]
    fn push_reward(&mut self, i: usize, b: &[f64]) {
        let mut j = i;
        for r in b.iter() {
            self.reward[j] = *r;
            j += 1;
            if j == self.capacity {
                j = 0;
            }
        }
    }

    #[inline]
    fn push_is_done(&mut self, i: usize, b: &[i8]) {
        let mut j = i;
        for d in b.iter() {
            self.is_done[j] = *d;
            j += 1;
            if j == self.capacity {
                j = 0;
            }
        }
    }

    fn sample_reward(&self, ixs: &[usize]) -> Vec<f64> {
        ixs.iter().map(|ix| self.reward[*ix]).collect()
    }

    fn sample_is_done(&self, ixs: &[usize]) -> Vec<i8> {
        ixs.iter().map(|ix| self.is_done[*ix]).collect()
    }

    /// Position of the next insert.
    pub fn cursor(&self) -> usize {
        self.i
    }

    /// Returns all stored observations in slot order.
    ///
    /// This copies the whole occupied storage.
    pub fn whole_obs(&self) -> Result<O> {
        let ixs = (0..self.size).collect::<Vec<_>>();
        self.obs.sample(&ixs)
    }

    /// Returns the stored rewards in slot order.
    pub fn rewards(&self) -> &[f64] {
        &self.reward[..self.size]
    }
}

impl<O, A> ExperienceBufferBase for SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type Item = GenericTransitionBatch<O, A>;

    fn len(&self) -> usize {
        self.size
    }

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let len = tr.reward.len();
        if len == 0 {
            return Ok(());
        }
        let GenericTransitionBatch {
            obs,
            act,
            next_obs,
            reward,
            is_done,
        } = tr;
        self.obs.push(self.i, obs)?;
        self.act.push(self.i, act)?;
        self.next_obs.push(self.i, next_obs)?;
        self.push_reward(self.i, &reward);
        self.push_is_done(self.i, &is_done);

        self.i = (self.i + len) % self.capacity;
        self.size += len;
        if self.size >= self.capacity {
            self.size = self.capacity;
        }

        Ok(())
    }
}

impl<O, A> ReplayBufferBase for SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type Config = SimpleReplayBufferConfig;
    type Batch = GenericTransitionBatch<O, A>;

    fn build(config: &Self::Config) -> Self {
        let capacity = config.capacity.max(1);

        Self {
            capacity,
            i: 0,
            size: 0,
            obs: O::new(capacity),
            act: A::new(capacity),
            next_obs: O::new(capacity),
            reward: vec![0.; capacity],
            is_done: vec![0; capacity],
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        if size > self.size || self.size == 0 {
            return Err(VapoError::InsufficientData {
                requested: size,
                available: self.size,
            }
            .into());
        }

        let ixs = (0..size)
            .map(|_| self.rng.gen_range(0..self.size))
            .collect::<Vec<_>>();

        Ok(Self::Batch {
            obs: self.obs.sample(&ixs)?,
            act: self.act.sample(&ixs)?,
            next_obs: self.next_obs.sample(&ixs)?,
            reward: self.sample_reward(&ixs),
            is_done: self.sample_is_done(&ixs),
        })
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes the buffer to `dir`.
    ///
    /// The files are written to a sibling directory that replaces `dir` once
    /// complete, so an interrupted save leaves the previous contents in place.
    fn save(&self, dir: &Path) -> Result<()> {
        replace_dir(dir, |tmp| {
            self.obs.save(&tmp.join(OBS_FILE))?;
            self.act.save(&tmp.join(ACT_FILE))?;
            self.next_obs.save(&tmp.join(NEXT_OBS_FILE))?;
            let meta = BufferMeta {
                capacity: self.capacity,
                cursor: self.i,
                size: self.size,
                reward: self.reward.clone(),
                is_done: self.is_done.clone(),
            };
            atomic_write(&tmp.join(META_FILE), &bincode::serialize(&meta)?)
        })?;
        info!("Saved {} transitions of the replay buffer to {:?}", self.size, dir);
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        let meta: BufferMeta = bincode::deserialize(&fs::read(dir.join(META_FILE))?)?;
        if meta.capacity != self.capacity {
            return Err(VapoError::IncompatibleCheckpoint(format!(
                "replay buffer capacity {} differs from stored capacity {}",
                self.capacity, meta.capacity
            ))
            .into());
        }
        self.obs.load(&dir.join(OBS_FILE))?;
        self.act.load(&dir.join(ACT_FILE))?;
        self.next_obs.load(&dir.join(NEXT_OBS_FILE))?;
        self.i = meta.cursor;
        self.size = meta.size;
        self.reward = meta.reward;
        self.is_done = meta.is_done;
        info!("Loaded {} transitions of the replay buffer from {:?}", self.size, dir);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{transition, VecBatch};
    use tempdir::TempDir;

    type Buffer = SimpleReplayBuffer<VecBatch, VecBatch>;

    fn buffer(capacity: usize) -> Buffer {
        Buffer::build(&SimpleReplayBufferConfig::default().capacity(capacity))
    }

    #[test]
    fn test_fifo_eviction() -> Result<()> {
        let mut buffer = buffer(5);
        for label in 1..=7 {
            buffer.push(transition(label as f32))?;
        }
        assert_eq!(buffer.len(), 5);

        let mut labels = buffer.whole_obs()?.0;
        labels.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(labels, vec![3.0, 4.0, 5.0, 6.0, 7.0]);

        let mut rewards = buffer.rewards().to_vec();
        rewards.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(rewards, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        Ok(())
    }

    #[test]
    fn test_occupancy_is_min_of_inserts_and_capacity() -> Result<()> {
        for capacity in [1, 3, 8] {
            let mut buffer = buffer(capacity);
            for n in 1..=20 {
                buffer.push(transition(n as f32))?;
                assert_eq!(buffer.len(), n.min(capacity));
            }
            // The most recent `capacity` labels survive.
            let mut labels = buffer.whole_obs()?.0;
            labels.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let expected = ((20 - capacity + 1)..=20).map(|l| l as f32).collect::<Vec<_>>();
            assert_eq!(labels, expected);
        }
        Ok(())
    }

    #[test]
    fn test_insufficient_data_before_batch_size() -> Result<()> {
        let mut buffer = buffer(100);
        let batch_size = 8;
        for n in 0..batch_size {
            let err = buffer.batch(batch_size).err().expect("sampling must fail");
            assert!(VapoError::is_insufficient_data(&err));
            buffer.push(transition(n as f32))?;
        }
        for n in 0..20 {
            let batch = buffer.batch(batch_size)?;
            assert_eq!(batch.reward.len(), batch_size);
            assert_eq!(batch.obs.0.len(), batch_size);
            assert_eq!(batch.next_obs.0.len(), batch_size);
            buffer.push(transition((batch_size + n) as f32))?;
        }
        Ok(())
    }

    #[test]
    fn test_samples_come_from_occupied_slots() -> Result<()> {
        let mut buffer = buffer(10);
        for label in 1..=4 {
            buffer.push(transition(label as f32))?;
        }
        for _ in 0..50 {
            let batch = buffer.batch(4)?;
            for (o, r) in batch.obs.0.iter().zip(&batch.reward) {
                assert!((1.0..=4.0).contains(o));
                assert_eq!(*o as f64, *r);
            }
        }
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new("replay_buffer")?;
        let mut buffer = buffer(5);
        for label in 1..=7 {
            buffer.push(transition(label as f32))?;
        }
        buffer.save(dir.path())?;

        let mut restored = self::buffer(5);
        restored.load(dir.path())?;
        assert_eq!(restored.len(), buffer.len());
        assert_eq!(restored.cursor(), buffer.cursor());
        assert_eq!(restored.rewards(), buffer.rewards());
        assert_eq!(restored.whole_obs()?.0, buffer.whole_obs()?.0);

        let mut other = self::buffer(6);
        assert!(other.load(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_save_replaces_previous_contents() -> Result<()> {
        let dir = TempDir::new("replay_buffer_resave")?;
        let path = dir.path().join("buffer");
        let mut buffer = buffer(5);
        for label in 1..=4 {
            buffer.push(transition(label as f32))?;
        }
        buffer.save(&path)?;

        let mut smaller = self::buffer(5);
        smaller.push(transition(9.0))?;
        smaller.save(&path)?;
        assert!(!dir.path().join("buffer.tmp").exists());

        let mut restored = self::buffer(5);
        restored.load(&path)?;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.whole_obs()?.0, vec![9.0]);
        Ok(())
    }
}
