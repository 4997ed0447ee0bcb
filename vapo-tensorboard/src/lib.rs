//! TensorBoard sink for vapo training records.
use log::warn;
use std::path::Path;
use tensorboard_rs::summary_writer::SummaryWriter;
use vapo_core::record::{Record, RecordValue, Recorder};

/// Write records to TFRecord.
pub struct TensorboardRecorder {
    writer: SummaryWriter,
    step_key: String,
    ignore_unsupported_value: bool,
}

impl TensorboardRecorder {
    /// Construct a [`TensorboardRecorder`].
    ///
    /// TFRecord will be stored in `logdir`. The x-axis of every scalar is the
    /// value of key `env_steps` in the same record.
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            step_key: "env_steps".to_string(),
            ignore_unsupported_value: true,
        }
    }

    /// Construct a [`TensorboardRecorder`] that warns on unsupported record values.
    pub fn new_with_check_unsupported_value<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            ignore_unsupported_value: false,
            ..Self::new(logdir)
        }
    }
}

impl Recorder for TensorboardRecorder {
    /// Write a given [`Record`] into a TFRecord.
    ///
    /// [`RecordValue::Scalar`] and [`RecordValue::Array2`] are written.
    /// Records without the step key are dropped.
    fn write(&mut self, record: Record) {
        let step = match record.get(&self.step_key) {
            Some(RecordValue::Scalar(v)) => *v as usize,
            _ => {
                warn!("Record without scalar {:?} dropped", self.step_key);
                return;
            }
        };

        for (k, v) in record.iter() {
            if *k == self.step_key {
                continue;
            }
            match v {
                RecordValue::Scalar(v) => self.writer.add_scalar(k, *v, step),
                RecordValue::DateTime(_) => {} // discard value
                RecordValue::Array2(data, shape) => {
                    let shape = [3, shape[0], shape[1]];
                    let min = data.iter().fold(f32::MAX, |m, v| v.min(m));
                    let scale = (data.iter().fold(-f32::MAX, |m, v| v.max(m)) - min).max(1e-8);
                    let gray = data
                        .iter()
                        .map(|&e| ((e - min) / scale * 255f32) as u8)
                        .collect::<Vec<_>>();
                    let rgb = gray.repeat(3);
                    self.writer.add_image(k, rgb.as_slice(), &shape, step)
                }
                _ => {
                    if !self.ignore_unsupported_value {
                        warn!("Unsupported value: {:?}", (k, v));
                    }
                }
            };
        }
    }

    fn flush(&mut self) {
        self.writer.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use tempdir::TempDir;

    #[test]
    fn test_write_scalars() -> Result<()> {
        let dir = TempDir::new("tensorboard")?;
        let mut recorder = TensorboardRecorder::new(dir.path());
        let mut record = Record::from_scalar("env_steps", 10.0);
        record.insert("train/critic_loss", RecordValue::Scalar(0.5));
        recorder.write(record);
        recorder.write(Record::from_scalar("train/actor_loss", 1.0));
        recorder.flush();
        assert!(std::fs::read_dir(dir.path())?.next().is_some());
        Ok(())
    }
}
