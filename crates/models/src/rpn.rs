//! Region proposal network head, shared across pyramid levels.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

const SHARED_CHANNELS: usize = 512;

/// Per-anchor outputs, anchors ordered level by level, then row-major over
/// feature cells, then by ratio.
#[derive(Debug, Clone)]
pub struct RpnOutput<B: Backend> {
    /// `[B, anchors, 2]`, background then foreground.
    pub class_logits: Tensor<B, 3>,
    pub probs: Tensor<B, 3>,
    /// `[B, anchors, 4]` as `(dy, dx, log dh, log dw)`, scaled by the std devs.
    pub deltas: Tensor<B, 3>,
}

impl<B: Backend> RpnOutput<B> {
    pub fn anchor_count(&self) -> usize {
        self.class_logits.dims()[1]
    }

    /// Join per-level outputs along the anchor axis.
    pub fn cat(levels: Vec<Self>) -> Self {
        let mut logits = Vec::with_capacity(levels.len());
        let mut probs = Vec::with_capacity(levels.len());
        let mut deltas = Vec::with_capacity(levels.len());
        for level in levels {
            logits.push(level.class_logits);
            probs.push(level.probs);
            deltas.push(level.deltas);
        }
        Self {
            class_logits: Tensor::cat(logits, 1),
            probs: Tensor::cat(probs, 1),
            deltas: Tensor::cat(deltas, 1),
        }
    }
}

#[derive(Debug, Module)]
pub struct RpnHead<B: Backend> {
    shared: Conv2d<B>,
    class: Conv2d<B>,
    bbox: Conv2d<B>,
    anchors_per_location: usize,
}

impl<B: Backend> RpnHead<B> {
    pub fn new(
        in_channels: usize,
        anchors_per_location: usize,
        anchor_stride: usize,
        device: &B::Device,
    ) -> Self {
        let shared = Conv2dConfig::new([in_channels, SHARED_CHANNELS], [3, 3])
            .with_stride([anchor_stride, anchor_stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let class = Conv2dConfig::new([SHARED_CHANNELS, 2 * anchors_per_location], [1, 1])
            .init(device);
        let bbox = Conv2dConfig::new([SHARED_CHANNELS, 4 * anchors_per_location], [1, 1])
            .init(device);
        Self {
            shared,
            class,
            bbox,
            anchors_per_location,
        }
    }

    pub fn forward(&self, feature: Tensor<B, 4>) -> RpnOutput<B> {
        let x = relu(self.shared.forward(feature));
        let class_logits = self.per_anchor(self.class.forward(x.clone()), 2);
        let deltas = self.per_anchor(self.bbox.forward(x), 4);
        RpnOutput {
            probs: softmax(class_logits.clone(), 2),
            class_logits,
            deltas,
        }
    }

    /// Run every level and concatenate in level order.
    pub fn forward_levels(&self, features: &[Tensor<B, 4>]) -> RpnOutput<B> {
        RpnOutput::cat(features.iter().map(|f| self.forward(f.clone())).collect())
    }

    /// `[B, A * k, H, W]` to `[B, H * W * A, k]`.
    fn per_anchor(&self, x: Tensor<B, 4>, k: usize) -> Tensor<B, 3> {
        let [batch, _, h, w] = x.dims();
        x.permute([0, 2, 3, 1])
            .reshape([batch, h * w * self.anchors_per_location, k])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn outputs_one_row_per_anchor() {
        let device = Default::default();
        let head = RpnHead::<TestBackend>::new(4, 3, 1, &device);
        let levels = vec![
            Tensor::<TestBackend, 4>::zeros([2, 4, 4, 4], &device),
            Tensor::<TestBackend, 4>::zeros([2, 4, 2, 2], &device),
        ];
        let out = head.forward_levels(&levels);
        assert_eq!(out.class_logits.dims(), [2, 60, 2]);
        assert_eq!(out.deltas.dims(), [2, 60, 4]);
        let probs = out.probs.into_data().to_vec::<f32>().unwrap();
        for pair in probs.chunks_exact(2) {
            assert!((pair[0] + pair[1] - 1.0).abs() < 1e-5);
        }
    }
}
