//! Per-region heads run on ROI-aligned features.
//!
//! Both heads accept zero-length batches and answer them with zero-shaped
//! outputs, so images without usable regions flow through unchanged.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::{relu, sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// `[N, classes]`.
    pub logits: Tensor<B, 2>,
    pub probs: Tensor<B, 2>,
    /// `[N, classes, 4]`.
    pub deltas: Tensor<B, 3>,
}

impl<B: Backend> ClassifierOutput<B> {
    pub fn len(&self) -> usize {
        self.logits.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Class scores and per-class box refinements for aligned regions.
pub trait RegionClassifier<B: Backend> {
    /// `features` is `[N, C, pool, pool]`.
    fn classify(&self, features: Tensor<B, 4>) -> ClassifierOutput<B>;
}

/// Per-class mask probabilities for aligned regions.
pub trait MaskPredictor<B: Backend> {
    /// `[N, C, pool, pool]` to `[N, classes, 2 * pool, 2 * pool]`.
    fn predict_masks(&self, features: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Two fully connected layers (the first as a `pool x pool` convolution)
/// followed by class and box branches.
#[derive(Debug, Module)]
pub struct Classifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    class_logits: Linear<B>,
    bbox: Linear<B>,
    fc_size: usize,
    num_classes: usize,
}

impl<B: Backend> Classifier<B> {
    pub fn new(
        in_channels: usize,
        pool_size: usize,
        fc_size: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv1: Conv2dConfig::new([in_channels, fc_size], [pool_size, pool_size]).init(device),
            conv2: Conv2dConfig::new([fc_size, fc_size], [1, 1]).init(device),
            class_logits: LinearConfig::new(fc_size, num_classes).init(device),
            bbox: LinearConfig::new(fc_size, num_classes * 4).init(device),
            fc_size,
            num_classes,
        }
    }
}

impl<B: Backend> RegionClassifier<B> for Classifier<B> {
    fn classify(&self, features: Tensor<B, 4>) -> ClassifierOutput<B> {
        let n = features.dims()[0];
        let device = features.device();
        if n == 0 {
            return ClassifierOutput {
                logits: Tensor::zeros([0, self.num_classes], &device),
                probs: Tensor::zeros([0, self.num_classes], &device),
                deltas: Tensor::zeros([0, self.num_classes, 4], &device),
            };
        }
        let x = relu(self.conv1.forward(features));
        let x = relu(self.conv2.forward(x));
        let x: Tensor<B, 2> = x.reshape([n, self.fc_size]);
        let logits = self.class_logits.forward(x.clone());
        let deltas = self.bbox.forward(x).reshape([n, self.num_classes, 4]);
        ClassifierOutput {
            probs: softmax(logits.clone(), 1),
            logits,
            deltas,
        }
    }
}

/// Four 3x3 convolutions, a 2x transposed convolution and a per-class 1x1
/// sigmoid output.
#[derive(Debug, Module)]
pub struct MaskHead<B: Backend> {
    convs: Vec<Conv2d<B>>,
    deconv: ConvTranspose2d<B>,
    output: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> MaskHead<B> {
    pub fn new(channels: usize, num_classes: usize, device: &B::Device) -> Self {
        let convs = (0..4)
            .map(|_| {
                Conv2dConfig::new([channels, channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();
        Self {
            convs,
            deconv: ConvTranspose2dConfig::new([channels, channels], [2, 2])
                .with_stride([2, 2])
                .init(device),
            output: Conv2dConfig::new([channels, num_classes], [1, 1]).init(device),
            num_classes,
        }
    }
}

impl<B: Backend> MaskPredictor<B> for MaskHead<B> {
    fn predict_masks(&self, features: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, _, h, w] = features.dims();
        if n == 0 {
            return Tensor::zeros([0, self.num_classes, 2 * h, 2 * w], &features.device());
        }
        let mut x = features;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        let x = relu(self.deconv.forward(x));
        sigmoid(self.output.forward(x))
    }
}
