//! Per-image ground truth and training records.

use box_utils::{box_area, minimize_mask, norm_box, AnchorSet};
use data_contracts::{ImageMeta, MaskConfig};
use image::RgbImage;
use rand::RngCore;
use targets::{build_rpn_targets, GroundTruth, RpnTargetConfig};

use crate::resize::{mold_image, resize_image, resize_mask};
use crate::source::AnnotationSource;
use crate::types::{BurnDatasetError, DatasetResult};

/// A resized image with its packed ground truth.
#[derive(Debug, Clone)]
pub struct ImageGt {
    pub image: RgbImage,
    pub meta: ImageMeta,
    pub gt: GroundTruth,
}

/// Load one image and its instances, resized to the molded shape.
///
/// Images with more than `max_gt_instances` instances keep a random subset.
/// Boxes come from the resized masks; instances whose mask vanishes on resize
/// or mini-mask compression are dropped, as are background-class instances.
pub fn load_image_gt<S: AnnotationSource + ?Sized>(
    source: &S,
    image_id: u64,
    cfg: &MaskConfig,
    rng: &mut dyn RngCore,
) -> DatasetResult<ImageGt> {
    let image = source.load_image(image_id)?;
    let mut instances = source.load_instances(image_id)?;
    let original_shape = (image.height() as usize, image.width() as usize);

    if instances.len() > cfg.max_gt_instances {
        let mut keep =
            rand::seq::index::sample(rng, instances.len(), cfg.max_gt_instances).into_vec();
        keep.sort_unstable();
        let mut all: Vec<Option<_>> = instances.into_iter().map(Some).collect();
        instances = keep.into_iter().filter_map(|i| all[i].take()).collect();
    }

    let resized = resize_image(&image, cfg.image_min_dim, cfg.image_max_dim);
    let meta = resized.meta(image_id, original_shape);
    let mut gt = GroundTruth::new(cfg.max_gt_instances, cfg.gt_mask_shape(), cfg.use_mini_mask);

    let mut dropped = 0usize;
    for inst in instances {
        let got = (inst.mask.height, inst.mask.width);
        if got != original_shape {
            return Err(BurnDatasetError::MaskShape {
                image_id,
                expected: original_shape,
                got,
            });
        }
        if inst.class_id == 0 {
            dropped += 1;
            continue;
        }
        let mask = resize_mask(&inst.mask, &resized);
        let bbox = mask.bbox();
        if box_area(&bbox) <= 0.0 {
            dropped += 1;
            continue;
        }
        let stored = if cfg.use_mini_mask {
            let mini = minimize_mask(&bbox, &mask, cfg.mini_mask_shape);
            if mini.is_blank() {
                dropped += 1;
                continue;
            }
            mini
        } else {
            mask
        };
        gt.push(inst.class_id, norm_box(&bbox, meta.image_shape), &stored);
    }
    if dropped > 0 {
        tracing::debug!(image_id, dropped, kept = gt.len(), "dropped instances");
    }

    Ok(ImageGt {
        image: resized.image,
        meta,
        gt,
    })
}

/// Everything the model needs to train on one image.
#[derive(Debug, Clone)]
pub struct MaskSample {
    /// Molded image, CHW.
    pub image: Vec<f32>,
    pub meta: ImageMeta,
    /// One of 1, 0, -1 per anchor.
    pub rpn_labels: Vec<i64>,
    /// Regression targets of the positive anchors, in anchor order.
    pub rpn_deltas: box_utils::PackedRows,
    pub gt: GroundTruth,
}

impl MaskSample {
    pub fn load<S: AnnotationSource + ?Sized>(
        source: &S,
        image_id: u64,
        cfg: &MaskConfig,
        anchors: &AnchorSet,
        rng: &mut dyn RngCore,
    ) -> DatasetResult<Self> {
        let ImageGt { image, meta, gt } = load_image_gt(source, image_id, cfg, rng)?;
        let rpn = build_rpn_targets(
            anchors.boxes(),
            &gt.boxes.boxes(),
            &RpnTargetConfig::from(cfg),
            rng,
        );
        Ok(Self {
            image: mold_image(&image, cfg.mean_pixel),
            meta,
            rpn_labels: rpn.labels_i64(),
            rpn_deltas: rpn.deltas,
            gt,
        })
    }
}
