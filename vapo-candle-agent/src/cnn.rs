//! Convolutional feature extractor for image channels.
mod base;
mod config;
pub use base::Cnn;
pub use config::CnnConfig;
