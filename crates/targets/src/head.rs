use box_utils::{crop_and_resize, encode_delta, is_padding_row, overlaps, BoxCoords, PackedRows};
use data_contracts::MaskConfig;
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::ground_truth::GroundTruth;

#[derive(Debug, Clone)]
pub struct HeadTargetConfig {
    pub rois_per_image: usize,
    pub positive_ratio: f32,
    pub positive_iou: f32,
    pub std_dev: [f32; 4],
    pub mask_shape: (usize, usize),
    pub mask_threshold: f32,
}

impl From<&MaskConfig> for HeadTargetConfig {
    fn from(cfg: &MaskConfig) -> Self {
        Self {
            rois_per_image: cfg.train_rois_per_image,
            positive_ratio: cfg.roi_positive_ratio,
            positive_iou: cfg.roi_positive_iou,
            std_dev: cfg.bbox_std_dev,
            mask_shape: cfg.mask_shape,
            mask_threshold: cfg.mask_threshold,
        }
    }
}

impl HeadTargetConfig {
    pub fn positive_cap(&self) -> usize {
        (self.rois_per_image as f32 * self.positive_ratio) as usize
    }

    fn mask_len(&self) -> usize {
        (self.mask_shape.0 * self.mask_shape.1).max(1)
    }
}

/// Sampled ROIs of one image with their training targets.
///
/// Positive ROIs come first. Every container holds `len()` valid rows out of
/// `rois_per_image`; negative rows carry class 0 and zero deltas and masks, so
/// the ROI count is authoritative rather than a zero-row test on the targets.
#[derive(Debug, Clone)]
pub struct HeadTargets {
    pub rois: PackedRows,
    pub class_ids: Vec<u32>,
    pub deltas: PackedRows,
    pub masks: PackedRows,
    pub mask_shape: (usize, usize),
    pub positive_count: usize,
}

impl HeadTargets {
    pub fn empty(cfg: &HeadTargetConfig) -> Self {
        Self {
            rois: PackedRows::new(cfg.rois_per_image, 4),
            class_ids: Vec::new(),
            deltas: PackedRows::new(cfg.rois_per_image, 4),
            masks: PackedRows::new(cfg.rois_per_image, cfg.mask_len()),
            mask_shape: cfg.mask_shape,
            positive_count: 0,
        }
    }

    /// No usable ROI: the caller must skip the heads for this image.
    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn negative_count(&self) -> usize {
        self.len() - self.positive_count
    }

    /// Class ids padded with zeros to `rois_per_image`.
    pub fn padded_class_ids(&self) -> Vec<i64> {
        let mut out = vec![0i64; self.rois.capacity()];
        for (dst, id) in out.iter_mut().zip(&self.class_ids) {
            *dst = *id as i64;
        }
        out
    }
}

/// Sample training ROIs from one image's proposals and build the class, box
/// and mask targets of the detection heads.
///
/// Padding rows among `proposals` are ignored. A proposal is positive when its
/// best IoU with the ground truth reaches `positive_iou`. Positives are
/// randomly capped at `rois_per_image * positive_ratio`; negatives fill the
/// rest of `rois_per_image`.
pub fn build_head_targets(
    proposals: &PackedRows,
    gt: &GroundTruth,
    cfg: &HeadTargetConfig,
    rng: &mut dyn RngCore,
) -> HeadTargets {
    let rois: Vec<BoxCoords> = proposals
        .boxes()
        .into_iter()
        .filter(|b| !is_padding_row(b))
        .collect();
    if rois.is_empty() {
        tracing::debug!("no proposals left for head targets");
        return HeadTargets::empty(cfg);
    }

    let gt_boxes = gt.boxes.boxes();
    let n_gt = gt_boxes.len();
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    let mut best_gt = vec![0usize; rois.len()];

    if n_gt == 0 {
        negatives.extend(0..rois.len());
    } else {
        let iou = overlaps(&rois, &gt_boxes);
        for (r, row) in iou.chunks_exact(n_gt).enumerate() {
            let (g, max) = row
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (g, v)| if v > best.1 { (g, v) } else { best });
            best_gt[r] = g;
            if max >= cfg.positive_iou {
                positives.push(r);
            } else {
                negatives.push(r);
            }
        }
    }

    positives.shuffle(rng);
    positives.truncate(cfg.positive_cap().min(cfg.rois_per_image));
    negatives.shuffle(rng);
    negatives.truncate(cfg.rois_per_image - positives.len());

    let mut out = HeadTargets::empty(cfg);
    let zero_mask = vec![0.0; cfg.mask_len()];
    for &r in &positives {
        let g = best_gt[r];
        let roi = &rois[r];
        let gt_box = &gt_boxes[g];
        out.rois.push(roi);
        out.class_ids.push(gt.class_id(g));
        out.deltas.push(&encode_delta(roi, gt_box, &cfg.std_dev));
        let target = match gt.mask(g) {
            Some(mask) => {
                let frame = if gt.mini_masks {
                    roi_in_box_frame(roi, gt_box)
                } else {
                    *roi
                };
                crop_and_resize(&mask, &frame, cfg.mask_shape)
                    .binarize(cfg.mask_threshold)
                    .data
            }
            None => zero_mask.clone(),
        };
        out.masks.push(&target);
    }
    out.positive_count = positives.len();
    for &r in &negatives {
        out.rois.push(&rois[r]);
        out.class_ids.push(0);
        out.deltas.push(&[0.0; 4]);
        out.masks.push(&zero_mask);
    }

    if out.positive_count == 0 {
        tracing::debug!(negatives = out.len(), "head targets without positives");
    }
    out
}

/// Express `roi` in the coordinate frame of `frame`, where `frame` spans
/// `[0, 1]` on both axes. Mini-masks cover exactly their ground-truth box.
fn roi_in_box_frame(roi: &BoxCoords, frame: &BoxCoords) -> BoxCoords {
    let h = (frame[2] - frame[0]).max(f32::EPSILON);
    let w = (frame[3] - frame[1]).max(f32::EPSILON);
    [
        (roi[0] - frame[0]) / h,
        (roi[1] - frame[1]) / w,
        (roi[2] - frame[0]) / h,
        (roi[3] - frame[1]) / w,
    ]
}
