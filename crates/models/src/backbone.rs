//! Feature pyramid backbones.
//!
//! Shapes:
//! - Input images: `[B, 3, H, W]`, molded (mean subtracted).
//! - Output: one `[B, C, H / s, W / s]` map per configured stride `s`,
//!   finest first (P2..P6 for the default strides).

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use data_contracts::MaskConfig;

use crate::error::ModelError;

/// Produces the pyramid levels consumed by the RPN and ROI alignment.
pub trait FeatureExtractor<B: Backend> {
    fn extract(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 4>>;
    /// Channels of every level.
    fn channels(&self) -> usize;
}

/// Nearest-neighbour 2x upsampling by repeating rows and columns.
pub fn upsample2<B: Backend>(xs: Tensor<B, 4>) -> Tensor<B, 4> {
    let xs: Tensor<B, 5> = xs.unsqueeze_dim(3);
    let xs: Tensor<B, 4> = xs.repeat_dim(3, 2).flatten(2, 3);
    let xs: Tensor<B, 5> = xs.unsqueeze_dim(4);
    xs.repeat_dim(4, 2).flatten(3, 4)
}

/// Keep every other row and column, a 1x1 max pool with stride 2.
pub fn subsample2<B: Backend>(xs: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = xs.dims();
    let device = xs.device();
    let rows: Vec<i64> = (0..h as i64).step_by(2).collect();
    let cols: Vec<i64> = (0..w as i64).step_by(2).collect();
    let (n_rows, n_cols) = (rows.len(), cols.len());
    let rows = Tensor::<B, 1, Int>::from_data(TensorData::new(rows, [n_rows]), &device);
    let cols = Tensor::<B, 1, Int>::from_data(TensorData::new(cols, [n_cols]), &device);
    xs.select(2, rows).select(3, cols)
}

/// A small convolutional feature pyramid network.
///
/// The bottom-up path is a strided stem followed by stride-2 stages; the
/// top-down path adds upsampled coarser levels to 1x1 lateral projections and
/// smooths each sum with a 3x3 conv. The coarsest level is a stride-2
/// subsample of the one before it.
#[derive(Debug, Module)]
pub struct SimpleFpn<B: Backend> {
    stem: Conv2d<B>,
    stages: Vec<Conv2d<B>>,
    laterals: Vec<Conv2d<B>>,
    smooth: Vec<Conv2d<B>>,
    channels: usize,
}

impl<B: Backend> SimpleFpn<B> {
    /// Strides must double level by level; the last level is pooled rather
    /// than convolved, so at least two levels are required.
    pub fn new(cfg: &MaskConfig, device: &B::Device) -> Result<Self, ModelError> {
        let strides = &cfg.backbone_strides;
        let doubling = strides.windows(2).all(|w| w[1] == w[0] * 2);
        if strides.len() < 2 || !doubling || strides[0] < 2 {
            return Err(ModelError::Strides(strides.clone()));
        }
        let c = cfg.pyramid_channels;
        let s = strides[0];
        let stem = Conv2dConfig::new([3, c], [s, s])
            .with_stride([s, s])
            .init(device);
        let conv_levels = strides.len() - 1;
        let stages = (1..conv_levels)
            .map(|_| {
                Conv2dConfig::new([c, c], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();
        let laterals = (0..conv_levels)
            .map(|_| Conv2dConfig::new([c, c], [1, 1]).init(device))
            .collect();
        let smooth = (0..conv_levels)
            .map(|_| {
                Conv2dConfig::new([c, c], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();
        Ok(Self {
            stem,
            stages,
            laterals,
            smooth,
            channels: c,
        })
    }
}

impl<B: Backend> FeatureExtractor<B> for SimpleFpn<B> {
    fn extract(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut bottom_up = vec![relu(self.stem.forward(images))];
        for stage in &self.stages {
            let prev = bottom_up[bottom_up.len() - 1].clone();
            bottom_up.push(relu(stage.forward(prev)));
        }

        let mut levels: Vec<Tensor<B, 4>> = Vec::with_capacity(bottom_up.len() + 1);
        let mut above: Option<Tensor<B, 4>> = None;
        for (c, lateral) in bottom_up.into_iter().zip(&self.laterals).rev() {
            let mut p = lateral.forward(c);
            if let Some(coarser) = above {
                p = p + upsample2(coarser);
            }
            above = Some(p.clone());
            levels.push(p);
        }
        levels.reverse();
        let mut levels: Vec<_> = levels
            .into_iter()
            .zip(&self.smooth)
            .map(|(p, conv)| conv.forward(p))
            .collect();
        if let Some(last) = levels.last().cloned() {
            levels.push(subsample2(last));
        }
        levels
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn small_config() -> MaskConfig {
        MaskConfig {
            image_min_dim: 64,
            image_max_dim: 64,
            pyramid_channels: 4,
            ..MaskConfig::default()
        }
    }

    #[test]
    fn levels_follow_the_configured_strides() {
        let device = Default::default();
        let cfg = small_config();
        let fpn = SimpleFpn::<TestBackend>::new(&cfg, &device).unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let levels = fpn.extract(images);
        let dims: Vec<_> = levels.iter().map(|l| l.dims()).collect();
        assert_eq!(
            dims,
            vec![[2, 4, 16, 16], [2, 4, 8, 8], [2, 4, 4, 4], [2, 4, 2, 2], [2, 4, 1, 1]]
        );
        let shapes: Vec<_> = cfg.backbone_shapes();
        for (d, (h, w)) in dims.iter().zip(shapes) {
            assert_eq!((d[2], d[3]), (h, w));
        }
    }

    #[test]
    fn non_doubling_strides_are_rejected() {
        let cfg = MaskConfig {
            backbone_strides: vec![4, 8, 24],
            rpn_anchor_scales: vec![8.0, 16.0, 32.0],
            ..small_config()
        };
        let err = SimpleFpn::<TestBackend>::new(&cfg, &Default::default()).unwrap_err();
        assert!(matches!(err, ModelError::Strides(_)));
    }

    #[test]
    fn resampling_helpers_invert_on_even_grids() {
        let device = Default::default();
        let data: Vec<f32> = (0..4).map(|v| v as f32).collect();
        let x = Tensor::<TestBackend, 4>::from_data(TensorData::new(data, [1, 1, 2, 2]), &device);
        let up = upsample2(x.clone());
        assert_eq!(up.dims(), [1, 1, 4, 4]);
        let flat = up.clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(&flat[..8], &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        let back = subsample2(up).into_data().to_vec::<f32>().unwrap();
        assert_eq!(back, vec![0.0, 1.0, 2.0, 3.0]);
    }
}
