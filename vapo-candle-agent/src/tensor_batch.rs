use crate::util::ColumnData;
use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use std::{fs, path::Path};
use vapo_core::{generic_replay_buffer::BatchBase, util::atomic_write};

/// A buffer consisting of a [`Tensor`].
///
/// Rows are indexed by the first dimension. The storage is allocated on the
/// first push with the shape `[capacity, data.dims()[1..]]` and lives on the CPU.
#[derive(Clone, Debug)]
pub struct TensorBatch {
    buf: Option<Tensor>,
    capacity: usize,
}

impl TensorBatch {
    /// Wraps a tensor whose first dimension indexes rows.
    pub fn from_tensor(t: Tensor) -> Self {
        let capacity = t.dims().first().copied().unwrap_or(0);
        Self {
            buf: Some(t),
            capacity,
        }
    }

    /// Number of rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the underlying tensor.
    pub fn tensor(&self) -> Option<&Tensor> {
        self.buf.as_ref()
    }

    /// Host copy of the storage in its own dtype.
    pub fn to_data(&self) -> Result<Option<ColumnData>> {
        self.buf.as_ref().map(ColumnData::from_tensor).transpose()
    }
}

impl BatchBase for TensorBatch {
    fn new(capacity: usize) -> Self {
        Self {
            buf: None,
            capacity,
        }
    }

    /// Pushes given data.
    ///
    /// Rows beyond the end of the buffer wrap around to the beginning.
    fn push(&mut self, index: usize, data: Self) -> Result<()> {
        let data = match data.buf {
            Some(t) => t.to_device(&Device::Cpu)?.contiguous()?,
            None => return Ok(()),
        };
        let batch_size = data.dims()[0];
        if batch_size == 0 {
            return Ok(());
        }

        let buf = match self.buf.take() {
            Some(buf) => buf,
            None => {
                let mut shape = data.dims().to_vec();
                shape[0] = self.capacity;
                Tensor::zeros(shape, data.dtype(), &Device::Cpu)?
            }
        };

        if index + batch_size > self.capacity {
            let head = self.capacity - index;
            buf.slice_set(&data.i(..head)?, 0, index)?;
            buf.slice_set(&data.i(head..)?, 0, 0)?;
        } else {
            buf.slice_set(&data, 0, index)?;
        }
        self.buf = Some(buf);
        Ok(())
    }

    fn sample(&self, ixs: &[usize]) -> Result<Self> {
        let buf = self
            .buf
            .as_ref()
            .ok_or_else(|| anyhow!("sampled from an empty TensorBatch"))?;
        let capacity = ixs.len();
        let ixs = {
            let ixs = ixs.iter().map(|x| *x as u32).collect();
            Tensor::from_vec(ixs, &[capacity], buf.device())?
        };
        Ok(Self {
            buf: Some(buf.index_select(&ixs, 0)?),
            capacity,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, &bincode::serialize(&self.to_data()?)?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let data: Option<ColumnData> = bincode::deserialize(&fs::read(path)?)?;
        self.buf = match data {
            Some(data) => Some(data.to_tensor(&Device::Cpu)?),
            None => None,
        };
        Ok(())
    }
}

impl TryFrom<TensorBatch> for Tensor {
    type Error = anyhow::Error;

    fn try_from(b: TensorBatch) -> Result<Self> {
        b.buf.ok_or_else(|| anyhow!("TensorBatch holds no data"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use tempdir::TempDir;

    fn rows(values: &[f32]) -> Result<TensorBatch> {
        let t = Tensor::from_slice(values, (values.len(), 1), &Device::Cpu)?;
        Ok(TensorBatch::from_tensor(t))
    }

    #[test]
    fn test_push_wraps_around() -> Result<()> {
        let mut batch = TensorBatch::new(4);
        batch.push(0, rows(&[1.0, 2.0, 3.0])?)?;
        batch.push(3, rows(&[4.0, 5.0])?)?;
        let t: Tensor = batch.clone().try_into()?;
        assert_eq!(t.flatten_all()?.to_vec1::<f32>()?, vec![5.0, 2.0, 3.0, 4.0]);

        let sampled: Tensor = batch.sample(&[3, 3, 0])?.try_into()?;
        assert_eq!(sampled.flatten_all()?.to_vec1::<f32>()?, vec![4.0, 4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let dir = TempDir::new("tensor_batch")?;
        let path = dir.path().join("batch.bin");
        let mut batch = TensorBatch::new(3);
        batch.push(1, rows(&[7.0])?)?;
        batch.save(&path)?;

        let mut loaded = TensorBatch::new(3);
        loaded.load(&path)?;
        let t: Tensor = loaded.try_into()?;
        assert_eq!(t.flatten_all()?.to_vec1::<f32>()?, vec![0.0, 7.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_save_load_keeps_dtype() -> Result<()> {
        let dir = TempDir::new("tensor_batch_u8")?;
        let path = dir.path().join("batch.bin");
        let row = |v: u8| Tensor::new(&[[v, v + 1, 255]], &Device::Cpu);

        let mut batch = TensorBatch::new(4);
        batch.push(0, TensorBatch::from_tensor(row(1)?))?;
        batch.save(&path)?;

        let mut loaded = TensorBatch::new(4);
        loaded.load(&path)?;
        assert_eq!(loaded.tensor().map(|t| t.dtype()), Some(DType::U8));

        loaded.push(1, TensorBatch::from_tensor(row(10)?))?;
        let t: Tensor = loaded.try_into()?;
        assert_eq!(
            t.to_vec2::<u8>()?,
            vec![vec![1, 2, 255], vec![10, 11, 255], vec![0, 0, 0], vec![0, 0, 0]]
        );
        Ok(())
    }
}
