use crate::{util::ColumnData, TensorBatch};
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use vapo_core::{generic_replay_buffer::BatchBase, util::atomic_write, Obs};

/// Observation as named channels, each a tensor with a leading batch dimension.
///
/// Vector observations use the single channel [`ObsTensors::VECTOR`].
#[derive(Clone, Debug, Default)]
pub struct ObsTensors(BTreeMap<String, Tensor>);

impl ObsTensors {
    /// Channel name of vector observations.
    pub const VECTOR: &'static str = "obs";

    /// Observation without channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector observation of shape `(batch_size, dim)`.
    pub fn vector(t: Tensor) -> Self {
        Self::new().with(Self::VECTOR, t)
    }

    /// Adds a channel.
    pub fn with(mut self, name: impl Into<String>, t: Tensor) -> Self {
        self.0.insert(name.into(), t);
        self
    }

    /// Returns a channel.
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.0
            .get(name)
            .ok_or_else(|| anyhow!("observation has no channel {:?}", name))
    }

    /// Returns `true` if the channel is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over the channels in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.0.iter()
    }

    /// Copies every channel to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self(
            self.0
                .iter()
                .map(|(k, t)| Ok((k.clone(), t.to_device(device)?)))
                .collect::<Result<_>>()?,
        ))
    }
}

impl Obs for ObsTensors {}

/// Replay buffer storage of [`ObsTensors`], one [`TensorBatch`] per channel.
#[derive(Clone, Debug)]
pub struct ObsBatch {
    capacity: usize,
    channels: BTreeMap<String, TensorBatch>,
}

#[derive(Serialize, Deserialize)]
struct ObsBatchData {
    capacity: usize,
    channels: BTreeMap<String, Option<ColumnData>>,
}

impl BatchBase for ObsBatch {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: BTreeMap::new(),
        }
    }

    fn push(&mut self, ix: usize, data: Self) -> Result<()> {
        for (name, batch) in data.channels {
            let capacity = self.capacity;
            self.channels
                .entry(name)
                .or_insert_with(|| TensorBatch::new(capacity))
                .push(ix, batch)?;
        }
        Ok(())
    }

    fn sample(&self, ixs: &[usize]) -> Result<Self> {
        Ok(Self {
            capacity: ixs.len(),
            channels: self
                .channels
                .iter()
                .map(|(k, b)| Ok((k.clone(), b.sample(ixs)?)))
                .collect::<Result<_>>()?,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let channels = self
            .channels
            .iter()
            .map(|(k, b)| Ok((k.clone(), b.to_data()?)))
            .collect::<Result<_>>()?;
        let data = ObsBatchData {
            capacity: self.capacity,
            channels,
        };
        atomic_write(path, &bincode::serialize(&data)?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let data: ObsBatchData = bincode::deserialize(&fs::read(path)?)?;
        self.capacity = data.capacity;
        self.channels = data
            .channels
            .into_iter()
            .map(|(k, t)| {
                let batch = match t {
                    Some(t) => TensorBatch::from_tensor(t.to_tensor(&Device::Cpu)?),
                    None => TensorBatch::new(data.capacity),
                };
                Ok((k, batch))
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}

impl From<ObsTensors> for ObsBatch {
    fn from(obs: ObsTensors) -> Self {
        let channels: BTreeMap<_, _> = obs
            .0
            .into_iter()
            .map(|(k, t)| (k, TensorBatch::from_tensor(t)))
            .collect();
        let capacity = channels.values().map(|b| b.capacity()).max().unwrap_or(0);
        Self { capacity, channels }
    }
}

impl TryFrom<ObsBatch> for ObsTensors {
    type Error = anyhow::Error;

    fn try_from(batch: ObsBatch) -> Result<Self> {
        Ok(Self(
            batch
                .channels
                .into_iter()
                .map(|(k, b)| Ok((k, Tensor::try_from(b)?)))
                .collect::<Result<_>>()?,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use tempdir::TempDir;

    #[test]
    fn test_channels_are_stored_independently() -> Result<()> {
        let obs = |v: f32| -> Result<ObsTensors> {
            Ok(ObsTensors::new()
                .with("robot_obs", Tensor::new(&[[v, -v]], &Device::Cpu)?)
                .with("img_obs", Tensor::full(v, (1, 1, 2, 2), &Device::Cpu)?))
        };

        let mut batch = ObsBatch::new(3);
        for (ix, v) in [1.0f32, 2.0, 3.0].iter().enumerate() {
            batch.push(ix, obs(*v)?.into())?;
        }
        let sampled: ObsTensors = batch.sample(&[2, 0])?.try_into()?;
        assert_eq!(
            sampled.get("robot_obs")?.to_vec2::<f32>()?,
            vec![vec![3.0, -3.0], vec![1.0, -1.0]]
        );
        assert_eq!(sampled.get("img_obs")?.dims(), &[2, 1, 2, 2]);
        assert!(sampled.get("depth_obs").is_err());
        Ok(())
    }

    #[test]
    fn test_image_channel_survives_save_load() -> Result<()> {
        let dir = TempDir::new("obs_batch")?;
        let path = dir.path().join("obs.bin");
        let obs = |v: u8| -> Result<ObsTensors> {
            Ok(ObsTensors::new()
                .with("robot_obs", Tensor::new(&[[v as f32]], &Device::Cpu)?)
                .with("img_obs", Tensor::full(v, (1, 1, 2, 2), &Device::Cpu)?))
        };

        let mut batch = ObsBatch::new(2);
        batch.push(0, obs(7)?.into())?;
        batch.save(&path)?;

        let mut loaded = ObsBatch::new(2);
        loaded.load(&path)?;
        loaded.push(1, obs(200)?.into())?;

        let all: ObsTensors = loaded.sample(&[0, 1])?.try_into()?;
        let img = all.get("img_obs")?;
        assert_eq!(img.dtype(), DType::U8);
        assert_eq!(img.flatten_all()?.to_vec1::<u8>()?, vec![7, 7, 7, 7, 200, 200, 200, 200]);
        assert_eq!(all.get("robot_obs")?.to_vec2::<f32>()?, vec![vec![7.0], vec![200.0]]);
        Ok(())
    }
}
