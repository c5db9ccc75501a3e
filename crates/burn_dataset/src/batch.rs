//! Batch iteration for training.

use std::sync::Arc;
use std::time::{Duration, Instant};

use box_utils::{stack_padded, AnchorSet};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use data_contracts::{ImageMeta, MaskConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::sample::MaskSample;
use crate::source::AnnotationSource;
use crate::types::DatasetResult;

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// One training batch, every per-image set padded to its configured capacity.
#[derive(Debug, Clone)]
pub struct MaskBatch<B: Backend> {
    /// `[batch, 3, H, W]`, molded.
    pub images: Tensor<B, 4>,
    /// `[batch, ImageMeta::LEN]`, see [`ImageMeta::mold`].
    pub image_meta: Tensor<B, 2>,
    /// `[batch, anchors]` with 1 positive, 0 neutral, -1 negative.
    pub rpn_match: Tensor<B, 2, Int>,
    /// `[batch, rpn_train_anchors_per_image, 4]`.
    pub rpn_bbox: Tensor<B, 3>,
    /// `[batch, max_gt_instances]`, zero for padding.
    pub gt_class_ids: Tensor<B, 2, Int>,
    /// `[batch, max_gt_instances, 4]`, normalized.
    pub gt_boxes: Tensor<B, 3>,
    /// `[batch, max_gt_instances, mask_h, mask_w]`.
    pub gt_masks: Tensor<B, 4>,
}

impl<B: Backend> MaskBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-image metadata decoded from `image_meta`, in batch order.
    pub fn metas(&self) -> Vec<ImageMeta> {
        let rows = self
            .image_meta
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default();
        rows.chunks_exact(ImageMeta::LEN)
            .filter_map(ImageMeta::unmold)
            .collect()
    }

    /// Stack samples in order. All samples must come from the same config.
    pub fn from_samples(samples: &[MaskSample], cfg: &MaskConfig, device: &B::Device) -> Self {
        let batch = samples.len();
        let (h, w) = cfg.image_shape();
        let (mh, mw) = cfg.gt_mask_shape();
        let anchors = samples.first().map(|s| s.rpn_labels.len()).unwrap_or(0);
        let cap = cfg.max_gt_instances;

        let mut images = Vec::with_capacity(batch * 3 * h * w);
        let mut meta_rows = Vec::with_capacity(batch * ImageMeta::LEN);
        let mut rpn_match = Vec::with_capacity(batch * anchors);
        for s in samples {
            images.extend_from_slice(&s.image);
            meta_rows.extend_from_slice(&s.meta.mold());
            rpn_match.extend_from_slice(&s.rpn_labels);
        }
        let deltas: Vec<_> = samples.iter().map(|s| s.rpn_deltas.clone()).collect();
        let rpn_bbox = stack_padded(&deltas, cfg.rpn_train_anchors_per_image, 4);

        let class_rows: Vec<_> = samples.iter().map(|s| s.gt.class_ids.clone()).collect();
        let class_ids: Vec<i64> = stack_padded(&class_rows, cap, 1)
            .into_iter()
            .map(|c| c as i64)
            .collect();
        let box_rows: Vec<_> = samples.iter().map(|s| s.gt.boxes.clone()).collect();
        let mask_rows: Vec<_> = samples.iter().map(|s| s.gt.masks.clone()).collect();

        Self {
            images: Tensor::from_data(TensorData::new(images, [batch, 3, h, w]), device),
            image_meta: Tensor::from_data(
                TensorData::new(meta_rows, [batch, ImageMeta::LEN]),
                device,
            ),
            rpn_match: Tensor::from_data(TensorData::new(rpn_match, [batch, anchors]), device),
            rpn_bbox: Tensor::from_data(
                TensorData::new(rpn_bbox, [batch, cfg.rpn_train_anchors_per_image, 4]),
                device,
            ),
            gt_class_ids: Tensor::from_data(TensorData::new(class_ids, [batch, cap]), device),
            gt_boxes: Tensor::from_data(
                TensorData::new(stack_padded(&box_rows, cap, 4), [batch, cap, 4]),
                device,
            ),
            gt_masks: Tensor::from_data(
                TensorData::new(stack_padded(&mask_rows, cap, mh * mw), [batch, cap, mh, mw]),
                device,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub shuffle: bool,
    pub drop_last: bool,
    /// Skip images left without any instance.
    pub skip_empty: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            shuffle: true,
            drop_last: false,
            skip_empty: true,
        }
    }
}

pub struct BatchIter<S: AnnotationSource> {
    source: Arc<S>,
    ids: Vec<u64>,
    cursor: usize,
    epoch: u64,
    cfg: MaskConfig,
    anchors: AnchorSet,
    opts: BatchOptions,
    processed_samples: usize,
    processed_batches: usize,
    skipped_empty: usize,
    skipped_errors: usize,
    permissive_errors: bool,
    started: Instant,
    total_load_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl<S: AnnotationSource> BatchIter<S> {
    pub fn new(source: Arc<S>, cfg: MaskConfig, opts: BatchOptions) -> DatasetResult<Self> {
        cfg.validate()?;
        let mut ids = source.image_ids();
        if opts.shuffle {
            let mut rng = match cfg.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            ids.shuffle(&mut rng);
        }
        let log_every_samples = match std::env::var("BURN_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let permissive_errors = std::env::var("BURN_DATASET_PERMISSIVE")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .map(|v| v == "0" || v == "false" || v == "off")
            .map(|strict| !strict)
            .unwrap_or(true);
        let anchors = AnchorSet::for_config(&cfg);
        let now = Instant::now();
        Ok(Self {
            source,
            ids,
            cursor: 0,
            epoch: 0,
            cfg,
            anchors,
            opts,
            processed_samples: 0,
            processed_batches: 0,
            skipped_empty: 0,
            skipped_errors: 0,
            permissive_errors,
            started: now,
            total_load_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
        })
    }

    /// Load failures skip the sample with a warning; when false they end the
    /// iteration with the error.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive_errors = permissive;
        self
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn remaining(&self) -> usize {
        self.ids.len().saturating_sub(self.cursor)
    }

    /// Rewind for another pass, reshuffling when configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        if self.opts.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.epoch)),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            self.ids.shuffle(&mut rng);
        }
    }

    fn sample_rng(&self, image_id: u64) -> StdRng {
        match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ image_id ^ (self.epoch << 32)),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<MaskBatch<B>>> {
        let batch_size = batch_size.max(1);
        let mut samples = Vec::with_capacity(batch_size);
        while samples.len() < batch_size {
            if self.cursor >= self.ids.len() {
                break;
            }
            let want = batch_size - samples.len();
            let end = (self.cursor + want).min(self.ids.len());
            let slice = &self.ids[self.cursor..end];
            self.cursor = end;

            let t_load = Instant::now();
            // Indexed collect keeps slice order.
            let loaded: Vec<_> = slice
                .par_iter()
                .map(|&id| {
                    let mut rng = self.sample_rng(id);
                    let source = self.source.as_ref();
                    let res = MaskSample::load(source, id, &self.cfg, &self.anchors, &mut rng);
                    (id, res)
                })
                .collect();
            self.total_load_time += t_load.elapsed();

            for (id, res) in loaded {
                let sample = match res {
                    Ok(s) => s,
                    Err(e) if self.permissive_errors => {
                        tracing::warn!(image_id = id, error = %e, "skipping sample");
                        self.skipped_errors += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if self.opts.skip_empty && sample.gt.is_empty() {
                    tracing::debug!(image_id = id, "no instances; skipping sample");
                    self.skipped_empty += 1;
                    continue;
                }
                samples.push(sample);
            }
        }

        if samples.is_empty() || (self.opts.drop_last && samples.len() < batch_size) {
            return Ok(None);
        }
        let batch = MaskBatch::from_samples(&samples, &self.cfg, device);
        self.processed_samples += samples.len();
        self.processed_batches += 1;
        self.maybe_log_progress();
        Ok(Some(batch))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let since_last = self.last_log.elapsed();
        if processed_since < threshold && since_last < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms = if self.processed_batches > 0 {
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        tracing::info!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            skipped_empty = self.skipped_empty,
            skipped_errors = self.skipped_errors,
            rate = self.processed_samples as f32 / secs,
            avg_load_ms,
            "dataset progress"
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}
