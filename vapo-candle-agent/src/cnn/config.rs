use crate::util::OutDim;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use vapo_core::error::VapoError;

/// Smallest image side the three convolutions accept.
pub const MIN_IMG_SIZE: usize = 36;

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Cnn`](super::Cnn).
pub struct CnnConfig {
    /// Number of input channels, e.g. the stacked history length.
    pub in_channels: usize,

    /// Side length of the square input image.
    pub img_size: usize,

    /// Dimension of the output features.
    pub out_feat: usize,
}

impl CnnConfig {
    /// Constructs [`CnnConfig`].
    ///
    /// Fails with [`VapoError::InvalidConfig`] when `img_size` is too
    /// small for the convolution stack.
    pub fn new(in_channels: usize, img_size: usize, out_feat: usize) -> Result<Self> {
        let config = Self {
            in_channels,
            img_size,
            out_feat,
        };
        config.check()?;
        Ok(config)
    }

    /// Checks the image size and the channel count.
    pub fn check(&self) -> Result<()> {
        if self.img_size < MIN_IMG_SIZE {
            return Err(VapoError::InvalidConfig(format!(
                "image size {} is below the minimum {}",
                self.img_size, MIN_IMG_SIZE
            ))
            .into());
        }
        if self.in_channels == 0 {
            return Err(VapoError::InvalidConfig("image without channels".to_string()).into());
        }
        Ok(())
    }

    /// Side length of the feature map after the last convolution.
    pub fn feature_map_size(&self) -> usize {
        let s = (self.img_size - 8) / 4 + 1;
        let s = (s - 4) / 2 + 1;
        s - 2
    }
}

impl OutDim for CnnConfig {
    fn get_out_dim(&self) -> usize {
        self.out_feat
    }

    fn set_out_dim(&mut self, v: usize) {
        self.out_feat = v;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_feature_map_size() -> Result<()> {
        assert_eq!(CnnConfig::new(3, 64, 16)?.feature_map_size(), 4);
        assert_eq!(CnnConfig::new(1, 84, 16)?.feature_map_size(), 7);
        assert_eq!(CnnConfig::new(1, 36, 16)?.feature_map_size(), 1);
        assert!(CnnConfig::new(1, 35, 16).is_err());
        Ok(())
    }
}
