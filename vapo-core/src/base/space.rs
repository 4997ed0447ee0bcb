//! Declared action and observation spaces.
use crate::error::VapoError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A box of continuous actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpace {
    /// Lower bounds.
    pub low: Vec<f32>,

    /// Upper bounds.
    pub high: Vec<f32>,
}

impl ActionSpace {
    /// Constructs a box action space.
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(VapoError::InvalidConfig(format!(
                "action bounds differ in length: {} vs {}",
                low.len(),
                high.len()
            ))
            .into());
        }
        if low.iter().zip(&high).any(|(l, h)| !(l < h)) {
            return Err(VapoError::InvalidConfig(format!(
                "action lower bounds {:?} must be below upper bounds {:?}",
                low, high
            ))
            .into());
        }
        Ok(Self { low, high })
    }

    /// Constructs `[-1, 1]^dim`.
    pub fn symmetric(dim: usize) -> Self {
        Self {
            low: vec![-1.0; dim],
            high: vec![1.0; dim],
        }
    }

    /// Dimension of actions.
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Half widths of the box, `(high - low) / 2`.
    pub fn scale(&self) -> Vec<f32> {
        self.low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| (h - l) / 2.0)
            .collect()
    }

    /// Centers of the box, `(high + low) / 2`.
    pub fn bias(&self) -> Vec<f32> {
        self.low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| (h + l) / 2.0)
            .collect()
    }
}

/// Schema of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsSpace {
    /// A numeric vector.
    Vector {
        /// Dimension of the vector.
        dim: usize,
    },

    /// Named channels, each with its own shape (batch dimension excluded).
    ///
    /// Typical channel names are `img_obs`, `depth_obs`, `gripper_img_obs`,
    /// `robot_obs`, `detected_target_pos` and `target_distance`.
    Dict(BTreeMap<String, Vec<usize>>),
}

impl ObsSpace {
    /// Returns the shape of a named channel of a dict space.
    pub fn channel(&self, name: &str) -> Option<&Vec<usize>> {
        match self {
            Self::Vector { .. } => None,
            Self::Dict(channels) => channels.get(name),
        }
    }

    /// Returns `true` if the space has a channel of the given name.
    pub fn has_channel(&self, name: &str) -> bool {
        self.channel(name).is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_action_space_scale_bias() -> Result<()> {
        let space = ActionSpace::new(vec![-2.0, 0.0], vec![2.0, 1.0])?;
        assert_eq!(space.dim(), 2);
        assert_eq!(space.scale(), vec![2.0, 0.5]);
        assert_eq!(space.bias(), vec![0.0, 0.5]);
        Ok(())
    }

    #[test]
    fn test_action_space_rejects_inverted_bounds() {
        assert!(ActionSpace::new(vec![1.0], vec![-1.0]).is_err());
        assert!(ActionSpace::new(vec![0.0, 0.0], vec![1.0]).is_err());
    }
}
