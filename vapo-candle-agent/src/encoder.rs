//! Feature extractor selected by the observation schema.
use crate::{
    cnn::{Cnn, CnnConfig},
    model::SubModel1,
    ObsTensors,
};
use anyhow::Result;
use candle_core::{DType::F32, Device, Tensor, D};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use vapo_core::{error::VapoError, ObsSpace};

/// Channel of the main camera image.
pub const IMG_OBS: &str = "img_obs";

/// Channel of the depth image.
pub const DEPTH_OBS: &str = "depth_obs";

/// Channel of the gripper camera image.
pub const GRIPPER_IMG_OBS: &str = "gripper_img_obs";

/// Vector channels appended to image features, in this order, when present.
pub const EXTRA_CHANNELS: [&str; 3] = ["robot_obs", "detected_target_pos", "target_distance"];

/// A vector channel concatenated to the image features.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ExtraChannel {
    /// Channel name.
    pub name: String,

    /// Dimension of the channel.
    pub dim: usize,
}

/// Configuration of [`Encoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum EncoderConfig {
    /// Passes a vector observation through.
    Vector {
        /// Dimension of the observation.
        dim: usize,
    },

    /// Features of the main camera image.
    Image {
        /// CNN of `img_obs`.
        img: CnnConfig,
        /// Appended vector channels.
        extras: Vec<ExtraChannel>,
    },

    /// Features of the main camera image and the depth image.
    ImageDepth {
        /// CNN of `img_obs`.
        img: CnnConfig,
        /// CNN of `depth_obs`.
        depth: CnnConfig,
        /// Appended vector channels.
        extras: Vec<ExtraChannel>,
    },

    /// Features of the main and the gripper camera images.
    ImageGripper {
        /// CNN of `img_obs`.
        img: CnnConfig,
        /// CNN of `gripper_img_obs`.
        gripper: CnnConfig,
        /// Appended vector channels.
        extras: Vec<ExtraChannel>,
    },
}

/// Input channels and image size of an image channel of shape `[c, h, w]` or `[h, w]`.
fn cnn_config(name: &str, shape: &[usize], out_feat: usize) -> Result<CnnConfig> {
    let (in_channels, h, w) = match *shape {
        [c, h, w] => (c, h, w),
        [h, w] => (1, h, w),
        _ => {
            return Err(VapoError::InvalidConfig(format!(
                "channel {} has shape {:?}, expected [c, h, w]",
                name, shape
            ))
            .into())
        }
    };
    if h != w {
        return Err(VapoError::InvalidConfig(format!(
            "channel {} is not square: {}x{}",
            name, h, w
        ))
        .into());
    }
    CnnConfig::new(in_channels, w, out_feat)
}

impl EncoderConfig {
    /// Chooses the variant from the declared observation schema.
    ///
    /// Every CNN emits `out_feat` features. Fails with
    /// [`VapoError::InvalidConfig`] when a dict schema has no `img_obs`
    /// channel or has both `depth_obs` and `gripper_img_obs`.
    pub fn from_obs_space(obs_space: &ObsSpace, out_feat: usize) -> Result<Self> {
        let channels = match obs_space {
            ObsSpace::Vector { dim } => return Ok(Self::Vector { dim: *dim }),
            ObsSpace::Dict(channels) => channels,
        };

        let img = match channels.get(IMG_OBS) {
            Some(shape) => cnn_config(IMG_OBS, shape, out_feat)?,
            None => {
                return Err(VapoError::InvalidConfig(format!(
                    "observation channels {:?} lack {}",
                    channels.keys().collect::<Vec<_>>(),
                    IMG_OBS
                ))
                .into())
            }
        };
        let extras = EXTRA_CHANNELS
            .iter()
            .filter_map(|name| {
                channels.get(*name).map(|shape| ExtraChannel {
                    name: name.to_string(),
                    dim: shape.iter().product::<usize>().max(1),
                })
            })
            .collect();

        match (channels.get(DEPTH_OBS), channels.get(GRIPPER_IMG_OBS)) {
            (Some(_), Some(_)) => Err(VapoError::InvalidConfig(format!(
                "{} and {} cannot be used together",
                DEPTH_OBS, GRIPPER_IMG_OBS
            ))
            .into()),
            (Some(shape), None) => Ok(Self::ImageDepth {
                img,
                depth: cnn_config(DEPTH_OBS, shape, out_feat)?,
                extras,
            }),
            (None, Some(shape)) => Ok(Self::ImageGripper {
                img,
                gripper: cnn_config(GRIPPER_IMG_OBS, shape, out_feat)?,
                extras,
            }),
            (None, None) => Ok(Self::Image { img, extras }),
        }
    }

    /// Dimension of the extracted features.
    pub fn out_dim(&self) -> usize {
        let extras_dim = |extras: &[ExtraChannel]| extras.iter().map(|e| e.dim).sum::<usize>();
        match self {
            Self::Vector { dim } => *dim,
            Self::Image { img, extras } => img.out_feat + extras_dim(extras),
            Self::ImageDepth { img, depth, extras } => {
                img.out_feat + depth.out_feat + extras_dim(extras)
            }
            Self::ImageGripper {
                img,
                gripper,
                extras,
            } => img.out_feat + gripper.out_feat + extras_dim(extras),
        }
    }
}

/// Extracts a flat feature vector from [`ObsTensors`].
pub struct Encoder {
    device: Device,
    img: Option<Cnn>,

    /// Depth or gripper CNN and its channel.
    aux: Option<(&'static str, Cnn)>,
    extras: Vec<String>,
}

impl Encoder {
    /// A `(batch_size, d)` view of a vector channel.
    fn flat(t: &Tensor) -> Result<Tensor> {
        let t = t.to_dtype(F32)?;
        match t.rank() {
            0 => Ok(t.reshape((1, 1))?),
            1 => Ok(t.unsqueeze(1)?),
            _ => Ok(t.flatten_from(1)?),
        }
    }
}

impl SubModel1 for Encoder {
    type Config = EncoderConfig;
    type Input = ObsTensors;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let device = vb.device().clone();
        let extra_names = |extras: &[ExtraChannel]| -> Vec<String> {
            extras.iter().map(|e| e.name.clone()).collect()
        };
        let (img, aux, extras) = match config {
            EncoderConfig::Vector { .. } => (None, None, vec![ObsTensors::VECTOR.to_string()]),
            EncoderConfig::Image { img, extras } => (
                Some(Cnn::build(vb.pp("cnn_img"), img)?),
                None,
                extra_names(&extras),
            ),
            EncoderConfig::ImageDepth { img, depth, extras } => (
                Some(Cnn::build(vb.pp("cnn_img"), img)?),
                Some((DEPTH_OBS, Cnn::build(vb.pp("cnn_depth"), depth)?)),
                extra_names(&extras),
            ),
            EncoderConfig::ImageGripper {
                img,
                gripper,
                extras,
            } => (
                Some(Cnn::build(vb.pp("cnn_img"), img)?),
                Some((GRIPPER_IMG_OBS, Cnn::build(vb.pp("cnn_gripper"), gripper)?)),
                extra_names(&extras),
            ),
        };

        Ok(Self {
            device,
            img,
            aux,
            extras,
        })
    }

    fn forward(&self, obs: &Self::Input) -> Result<Tensor> {
        let mut features = vec![];
        if let Some(cnn) = &self.img {
            features.push(cnn.forward(obs.get(IMG_OBS)?)?);
        }
        if let Some((name, cnn)) = &self.aux {
            features.push(cnn.forward(obs.get(name)?)?);
        }
        for name in self.extras.iter() {
            features.push(Self::flat(&obs.get(name)?.to_device(&self.device)?)?);
        }
        match features.len() {
            1 => Ok(features.remove(0)),
            _ => Ok(Tensor::cat(&features, D::Minus1)?),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;
    use std::collections::BTreeMap;

    fn dict(channels: &[(&str, Vec<usize>)]) -> ObsSpace {
        ObsSpace::Dict(
            channels
                .iter()
                .map(|(k, s)| (k.to_string(), s.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_variant_by_schema() -> Result<()> {
        let config = EncoderConfig::from_obs_space(&ObsSpace::Vector { dim: 7 }, 16)?;
        assert_eq!(config, EncoderConfig::Vector { dim: 7 });
        assert_eq!(config.out_dim(), 7);

        let space = dict(&[("img_obs", vec![3, 64, 64]), ("robot_obs", vec![7])]);
        let config = EncoderConfig::from_obs_space(&space, 16)?;
        assert!(matches!(config, EncoderConfig::Image { .. }));
        assert_eq!(config.out_dim(), 16 + 7);

        let space = dict(&[
            ("img_obs", vec![3, 64, 64]),
            ("depth_obs", vec![64, 64]),
            ("target_distance", vec![1]),
            ("detected_target_pos", vec![3]),
        ]);
        let config = EncoderConfig::from_obs_space(&space, 16)?;
        match &config {
            EncoderConfig::ImageDepth { depth, extras, .. } => {
                assert_eq!(depth.in_channels, 1);
                let names = extras.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
                assert_eq!(names, vec!["detected_target_pos", "target_distance"]);
            }
            _ => panic!("expected ImageDepth, got {:?}", config),
        }
        assert_eq!(config.out_dim(), 16 + 16 + 3 + 1);

        let space = dict(&[("img_obs", vec![3, 64, 64]), ("gripper_img_obs", vec![1, 64, 64])]);
        let config = EncoderConfig::from_obs_space(&space, 8)?;
        assert!(matches!(config, EncoderConfig::ImageGripper { .. }));
        assert_eq!(config.out_dim(), 16);
        Ok(())
    }

    #[test]
    fn test_invalid_schemas() {
        let invalid = |space: ObsSpace| {
            let err = EncoderConfig::from_obs_space(&space, 16).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<VapoError>(),
                Some(VapoError::InvalidConfig(_))
            ));
        };
        invalid(dict(&[
            ("img_obs", vec![3, 64, 64]),
            ("depth_obs", vec![1, 64, 64]),
            ("gripper_img_obs", vec![1, 64, 64]),
        ]));
        invalid(dict(&[("robot_obs", vec![7])]));
        invalid(dict(&[("img_obs", vec![3, 32, 32])]));
        invalid(dict(&[("img_obs", vec![3, 64, 48])]));
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let space = dict(&[
            ("img_obs", vec![3, 64, 64]),
            ("depth_obs", vec![1, 64, 64]),
            ("robot_obs", vec![7]),
            ("target_distance", vec![1]),
        ]);
        let config = EncoderConfig::from_obs_space(&space, 16)?;
        let out_dim = config.out_dim();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = Encoder::build(vb, config)?;

        let obs = ObsTensors::new()
            .with("img_obs", Tensor::rand(0f32, 1f32, (4, 3, 64, 64), &Device::Cpu)?)
            .with("depth_obs", Tensor::rand(0f32, 1f32, (4, 1, 64, 64), &Device::Cpu)?)
            .with("robot_obs", Tensor::zeros((4, 7), DType::F32, &Device::Cpu)?)
            .with("target_distance", Tensor::zeros((4,), DType::F32, &Device::Cpu)?);
        assert_eq!(encoder.forward(&obs)?.dims(), &[4, out_dim]);

        let missing = ObsTensors::new()
            .with("img_obs", Tensor::rand(0f32, 1f32, (4, 3, 64, 64), &Device::Cpu)?);
        assert!(encoder.forward(&missing).is_err());
        Ok(())
    }
}
