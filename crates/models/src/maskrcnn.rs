//! Mask R-CNN assembly: backbone, RPN, proposal filtering and the two
//! region heads wired together for training and inference.

use std::path::Path;

use box_utils::{box_area, unmold_mask, AnchorSet, BoxCoords, MaskPlane, PackedRows};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use burn_dataset::{mold_image, resize_image, MaskBatch};
use data_contracts::{ImageMeta, MaskConfig};
use filters::{
    generate_proposals, image_rng, map_images, refine_detections, roi_align, DetectionConfig,
    ImageDetections, ProposalConfig,
};
use image::RgbImage;
use targets::{build_head_targets, GroundTruth, HeadTargetConfig, HeadTargets};

use crate::backbone::{FeatureExtractor, SimpleFpn};
use crate::error::ModelError;
use crate::head::{Classifier, ClassifierOutput, MaskHead, MaskPredictor, RegionClassifier};
use crate::rpn::{RpnHead, RpnOutput};

/// The trainable part of the model.
#[derive(Debug, Module)]
pub struct MaskRcnnNet<B: Backend> {
    pub backbone: SimpleFpn<B>,
    pub rpn: RpnHead<B>,
    pub classifier: Classifier<B>,
    pub mask: MaskHead<B>,
}

impl<B: Backend> MaskRcnnNet<B> {
    pub fn new(cfg: &MaskConfig, device: &B::Device) -> Result<Self, ModelError> {
        let backbone = SimpleFpn::new(cfg, device)?;
        let channels = backbone.channels();
        Ok(Self {
            rpn: RpnHead::new(
                channels,
                cfg.anchors_per_location(),
                cfg.rpn_anchor_stride,
                device,
            ),
            classifier: Classifier::new(
                channels,
                cfg.pool_size,
                cfg.fc_layers_size,
                cfg.num_classes,
                device,
            ),
            mask: MaskHead::new(channels, cfg.num_classes, device),
            backbone,
        })
    }
}

/// Head predictions and their targets over the sampled ROIs of every image
/// with usable ROIs, concatenated image by image.
#[derive(Debug, Clone)]
pub struct HeadOutput<B: Backend> {
    /// Per-image sampling result; images whose targets are empty were
    /// skipped by the heads.
    pub targets: Vec<HeadTargets>,
    /// Rows contributed by each image, in batch order.
    pub roi_counts: Vec<usize>,
    /// `[N]`.
    pub target_class_ids: Tensor<B, 1, Int>,
    /// `[N, 4]`.
    pub target_deltas: Tensor<B, 2>,
    /// `[N, mask_h, mask_w]`.
    pub target_masks: Tensor<B, 3>,
    pub classifier: ClassifierOutput<B>,
    /// `[N, classes, mask_h, mask_w]`.
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> HeadOutput<B> {
    pub fn len(&self) -> usize {
        self.roi_counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutput<B: Backend> {
    pub rpn: RpnOutput<B>,
    /// `None` when the config disables the heads.
    pub heads: Option<HeadOutput<B>>,
}

/// Detections of one molded image.
#[derive(Debug, Clone)]
pub struct ImageOutput {
    pub meta: ImageMeta,
    pub detections: ImageDetections,
    /// Mask probabilities of each detection's class, `mask_shape` sized and
    /// relative to its box.
    pub masks: Vec<MaskPlane>,
}

impl ImageOutput {
    /// Paste the masks into original-image planes and drop detections whose
    /// pixel box is empty.
    pub fn unmold(&self, threshold: f32) -> Prediction {
        let mut out = Prediction {
            image_id: self.meta.image_id,
            ..Prediction::default()
        };
        let det = &self.detections;
        for (i, b) in det.boxes.iter().enumerate() {
            if box_area(b) <= 0.0 {
                continue;
            }
            let Some(mask) = self.masks.get(i) else {
                continue;
            };
            out.boxes.push(*b);
            out.class_ids.push(det.class_ids[i]);
            out.scores.push(det.scores[i]);
            out.masks
                .push(unmold_mask(mask, b, self.meta.original_shape, threshold));
        }
        out
    }
}

/// Final result for one input image, in its own pixel coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub image_id: u64,
    pub boxes: Vec<BoxCoords>,
    pub class_ids: Vec<u32>,
    pub scores: Vec<f32>,
    /// Binary full-image masks.
    pub masks: Vec<MaskPlane>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug)]
pub struct MaskRcnn<B: Backend> {
    net: MaskRcnnNet<B>,
    config: MaskConfig,
    anchors: AnchorSet,
    device: B::Device,
}

impl<B: Backend> MaskRcnn<B> {
    /// Validates the config; an invalid one is fatal.
    pub fn new(config: MaskConfig, device: &B::Device) -> Result<Self, ModelError> {
        config.validate()?;
        let net = MaskRcnnNet::new(&config, device)?;
        let anchors = AnchorSet::for_config(&config);
        tracing::info!(name = %config.name, anchors = anchors.len(), "built model");
        Ok(Self {
            net,
            config,
            anchors,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn net(&self) -> &MaskRcnnNet<B> {
        &self.net
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Replace the weights with those recorded at `path`.
    pub fn load_weights(self, path: &Path) -> Result<Self, ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let net = self
            .net
            .load_file(path, &recorder, &self.device)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), "loaded weights");
        Ok(Self { net, ..self })
    }

    pub fn save_weights(&self, path: &Path) -> Result<(), ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.net
            .clone()
            .save_file(path, &recorder)
            .map_err(|e| ModelError::Record {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Pyramid levels and RPN outputs over every level.
    pub fn rpn_forward(&self, images: Tensor<B, 4>) -> (Vec<Tensor<B, 4>>, RpnOutput<B>) {
        let features = self.net.backbone.extract(images);
        let rpn = self.net.rpn.forward_levels(&features);
        (features, rpn)
    }

    /// Training forward pass. Head targets are sampled per image; images
    /// without usable ROIs contribute no head rows.
    pub fn forward_train(&self, batch: &MaskBatch<B>) -> TrainOutput<B> {
        let cfg = &self.config;
        let (features, rpn) = self.rpn_forward(batch.images.clone());
        if !cfg.heads_enabled {
            return TrainOutput { rpn, heads: None };
        }

        let (proposals, _) = generate_proposals(
            rpn.probs.clone(),
            rpn.deltas.clone(),
            &self.anchors,
            &ProposalConfig::training(cfg),
        );
        let gts = self.ground_truth(batch);
        let head_cfg = HeadTargetConfig::from(cfg);
        let targets = map_images(proposals.len().min(gts.len()), |i| {
            let mut rng = image_rng(cfg.seed, i);
            build_head_targets(&proposals[i], &gts[i], &head_cfg, &mut rng)
        });
        let skipped = targets.iter().filter(|t| t.is_empty()).count();
        if skipped > 0 {
            tracing::debug!(skipped, images = targets.len(), "images without head ROIs");
        }

        let heads = self.run_heads(&features, targets);
        TrainOutput {
            rpn,
            heads: Some(heads),
        }
    }

    /// Unpack the padded ground truth of a batch.
    fn ground_truth(&self, batch: &MaskBatch<B>) -> Vec<GroundTruth> {
        let cfg = &self.config;
        let cap = cfg.max_gt_instances;
        let mask_shape = cfg.gt_mask_shape();
        let mask_len = (mask_shape.0 * mask_shape.1).max(1);
        let class_ids: Vec<f32> = int_values(batch.gt_class_ids.clone())
            .into_iter()
            .map(|c| c as f32)
            .collect();
        let boxes = float_values(batch.gt_boxes.clone());
        let masks = float_values(batch.gt_masks.clone());
        class_ids
            .chunks_exact(cap)
            .zip(boxes.chunks_exact(cap * 4))
            .zip(masks.chunks_exact(cap * mask_len))
            .map(|((c, b), m)| {
                GroundTruth::from_padded(c, b, m, cap, mask_shape, cfg.use_mini_mask)
            })
            .collect()
    }

    fn run_heads(&self, features: &[Tensor<B, 4>], targets: Vec<HeadTargets>) -> HeadOutput<B> {
        let cfg = &self.config;
        let rois: Vec<Vec<BoxCoords>> = targets.iter().map(|t| t.rois.boxes()).collect();
        let roi_counts: Vec<usize> = rois.iter().map(Vec::len).collect();
        let levels = head_levels(features);
        let shape = cfg.image_shape();

        let pooled = roi_align(levels, &rois, cfg.pool_size, shape);
        let classifier = self.net.classifier.classify(pooled);
        let pooled = roi_align(levels, &rois, cfg.mask_pool_size, shape);
        let masks = self.net.mask.predict_masks(pooled);

        let n: usize = roi_counts.iter().sum();
        let (mh, mw) = cfg.mask_shape;
        let mut class_ids = Vec::with_capacity(n);
        let mut deltas = Vec::with_capacity(n * 4);
        let mut mask_rows = Vec::with_capacity(n * mh * mw);
        for t in &targets {
            class_ids.extend(t.class_ids.iter().map(|&c| c as i64));
            deltas.extend_from_slice(t.deltas.as_flat());
            mask_rows.extend_from_slice(t.masks.as_flat());
        }
        let device = &self.device;
        HeadOutput {
            targets,
            roi_counts,
            target_class_ids: Tensor::from_data(TensorData::new(class_ids, [n]), device),
            target_deltas: Tensor::from_data(TensorData::new(deltas, [n, 4]), device),
            target_masks: Tensor::from_data(TensorData::new(mask_rows, [n, mh, mw]), device),
            classifier,
            masks,
        }
    }

    /// Inference on molded images. Masks are computed only for the kept
    /// detections.
    pub fn detect(
        &self,
        images: Tensor<B, 4>,
        metas: &[ImageMeta],
    ) -> Result<Vec<ImageOutput>, ModelError> {
        let cfg = &self.config;
        let [batch, _, h, w] = images.dims();
        if batch != metas.len() {
            return Err(ModelError::BatchMismatch {
                images: batch,
                metas: metas.len(),
            });
        }
        let expected = cfg.image_shape();
        if (h, w) != expected {
            return Err(ModelError::ImageShape {
                expected,
                got: (h, w),
            });
        }

        let (features, rpn) = self.rpn_forward(images);
        let (proposals, _) = generate_proposals(
            rpn.probs,
            rpn.deltas,
            &self.anchors,
            &ProposalConfig::inference(cfg),
        );
        let levels = head_levels(&features);
        let rois: Vec<Vec<BoxCoords>> = proposals.iter().map(PackedRows::boxes).collect();
        let pooled = roi_align(levels, &rois, cfg.pool_size, expected);
        let classified = self.net.classifier.classify(pooled);

        let classes = cfg.num_classes;
        let probs = float_values(classified.probs);
        let deltas = float_values(classified.deltas);
        let offsets = prefix_sums(rois.iter().map(Vec::len));
        let det_cfg = DetectionConfig::from(cfg);
        let detections = map_images(batch, |i| {
            let (start, end) = (offsets[i], offsets[i + 1]);
            refine_detections(
                proposals[i].as_flat(),
                probs.get(start * classes..end * classes).unwrap_or_default(),
                deltas
                    .get(start * classes * 4..end * classes * 4)
                    .unwrap_or_default(),
                classes,
                &metas[i],
                &det_cfg,
            )
        });

        let kept: Vec<Vec<BoxCoords>> = detections.iter().map(|d| d.rois.boxes()).collect();
        let pooled = roi_align(levels, &kept, cfg.mask_pool_size, expected);
        let mask_probs = float_values(self.net.mask.predict_masks(pooled));
        let (mh, mw) = cfg.mask_shape;
        let plane = mh * mw;

        let mut outputs = Vec::with_capacity(batch);
        let mut row = 0;
        for (detections, meta) in detections.into_iter().zip(metas) {
            let masks = detections
                .class_ids
                .iter()
                .enumerate()
                .map(|(j, &class_id)| {
                    let start = ((row + j) * classes + class_id as usize) * plane;
                    let data = mask_probs
                        .get(start..start + plane)
                        .map(<[f32]>::to_vec)
                        .unwrap_or_else(|| vec![0.0; plane]);
                    MaskPlane::from_vec(mh, mw, data).unwrap_or_else(|| MaskPlane::zeros(mh, mw))
                })
                .collect();
            row += detections.len();
            outputs.push(ImageOutput {
                meta: *meta,
                detections,
                masks,
            });
        }
        let counts: Vec<usize> = outputs.iter().map(|o| o.detections.len()).collect();
        tracing::debug!(?counts, "detected");
        Ok(outputs)
    }

    /// Resize, mold and detect raw images, returning results in each
    /// image's own coordinates. `image_id` is the index in `images`.
    pub fn predict(&self, images: &[RgbImage]) -> Result<Vec<Prediction>, ModelError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let cfg = &self.config;
        let (h, w) = cfg.image_shape();
        let mut molded = Vec::with_capacity(images.len() * 3 * h * w);
        let mut metas = Vec::with_capacity(images.len());
        for (i, img) in images.iter().enumerate() {
            let resized = resize_image(img, cfg.image_min_dim, cfg.image_max_dim);
            let original = (img.height() as usize, img.width() as usize);
            metas.push(resized.meta(i as u64, original));
            molded.extend(mold_image(&resized.image, cfg.mean_pixel));
        }
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(molded, [metas.len(), 3, h, w]),
            &self.device,
        );
        let outputs = self.detect(images, &metas)?;
        Ok(outputs
            .iter()
            .map(|o| o.unmold(cfg.mask_threshold))
            .collect())
    }
}

/// The heads read P2..P5; the coarsest level feeds the RPN only.
fn head_levels<B: Backend>(features: &[Tensor<B, 4>]) -> &[Tensor<B, 4>] {
    match features.len() {
        0 | 1 => features,
        n => &features[..n - 1],
    }
}

fn prefix_sums(counts: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut out = vec![0];
    for c in counts {
        out.push(out[out.len() - 1] + c);
    }
    out
}

fn float_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data().convert::<f32>().to_vec::<f32>().unwrap_or_default()
}

fn int_values<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Vec<i64> {
    t.into_data().convert::<i64>().to_vec::<i64>().unwrap_or_default()
}
