//! Structured records of training metrics and the sinks they are written to.
//!
//! A [`Record`] is a key/value map produced by the environment, the agent and
//! the [`Trainer`](crate::Trainer). Records are handed to an explicit
//! [`Recorder`] rather than to a process-wide writer.
//!
//! ```rust
//! use vapo_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("env_steps", RecordValue::Scalar(100.0));
//! record.insert("train/episode_return", RecordValue::Scalar(-3.2));
//! assert_eq!(record.get_scalar("env_steps").unwrap(), 100.0);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
