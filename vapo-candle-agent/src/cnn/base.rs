use super::CnnConfig;
use crate::model::SubModel1;
use anyhow::Result;
use candle_core::{DType::F32, Device, Tensor};
use candle_nn::{
    conv::Conv2dConfig,
    conv2d, linear,
    sequential::{seq, Sequential},
    Linear, Module, VarBuilder,
};

/// Expected feature coordinates of each channel of a feature map.
///
/// Every channel is normalized by a softmax over its pixels, and the
/// coordinates are averaged under that distribution.
struct SpatialSoftmax {
    /// `(h * w, 1)`, row coordinate of each pixel.
    x_map: Tensor,

    /// `(h * w, 1)`, column coordinate of each pixel.
    y_map: Tensor,
}

impl SpatialSoftmax {
    fn new(rows: usize, cols: usize, device: &Device) -> Result<Self> {
        let mut x_map = Vec::with_capacity(rows * cols);
        let mut y_map = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                x_map.push((i as f32 - rows as f32 / 2.0) / rows as f32);
                y_map.push((j as f32 - cols as f32 / 2.0) / cols as f32);
            }
        }
        Ok(Self {
            x_map: Tensor::from_vec(x_map, (rows * cols, 1), device)?,
            y_map: Tensor::from_vec(y_map, (rows * cols, 1), device)?,
        })
    }

    /// `(b, c, h, w) -> (b, 2c)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = xs.dims4()?;
        let xs = xs.reshape((b, c, h * w))?;
        let xs = candle_nn::ops::softmax_last_dim(&xs)?;
        let fp_x = xs.broadcast_matmul(&self.x_map)?.squeeze(2)?;
        let fp_y = xs.broadcast_matmul(&self.y_map)?.squeeze(2)?;
        Ok(Tensor::cat(&[fp_x, fp_y], 1)?)
    }
}

/// Three convolutions followed by a spatial softmax and a linear layer.
pub struct Cnn {
    device: Device,
    convs: Sequential,
    spatial_softmax: SpatialSoftmax,
    fc: Linear,
}

impl Cnn {
    fn stride(s: usize) -> Conv2dConfig {
        Conv2dConfig {
            stride: s,
            ..Default::default()
        }
    }

    fn create_convs(vb: &VarBuilder, in_channels: usize) -> Result<Sequential> {
        let seq = seq()
            .add(conv2d(in_channels, 16, 8, Self::stride(4), vb.pp("c1"))?)
            .add_fn(|xs| xs.relu())
            .add(conv2d(16, 32, 4, Self::stride(2), vb.pp("c2"))?)
            .add_fn(|xs| xs.relu())
            .add(conv2d(32, 64, 3, Self::stride(1), vb.pp("c3"))?);

        Ok(seq)
    }
}

impl SubModel1 for Cnn {
    type Config = CnnConfig;
    type Input = Tensor;
    type Output = Tensor;

    /// `(b, c, h, w)` or `(c, h, w)` images to `(b, out_feat)` features.
    fn forward(&self, xs: &Self::Input) -> Result<Tensor> {
        let xs = xs.to_device(&self.device)?.to_dtype(F32)?;
        let xs = match xs.rank() {
            3 => xs.unsqueeze(0)?,
            _ => xs,
        };
        let xs = self.convs.forward(&xs)?;
        let xs = self.spatial_softmax.forward(&xs)?;
        Ok(self.fc.forward(&xs)?)
    }

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        config.check()?;
        let device = vb.device().clone();
        let convs = Self::create_convs(&vb, config.in_channels)?;
        let s = config.feature_map_size();
        let spatial_softmax = SpatialSoftmax::new(s, s, &device)?;
        let fc = linear(2 * 64, config.out_feat, vb.pp("fc"))?;

        Ok(Self {
            device,
            convs,
            spatial_softmax,
            fc,
        })
    }
}
