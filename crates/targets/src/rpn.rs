use std::collections::BTreeSet;

use box_utils::{encode_delta, overlaps, BoxCoords, PackedRows};
use data_contracts::MaskConfig;
use rand::seq::SliceRandom;
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorLabel {
    Negative,
    Neutral,
    Positive,
}

impl AnchorLabel {
    /// Tensor encoding: 1 positive, 0 neutral, -1 negative.
    pub fn as_i64(self) -> i64 {
        match self {
            AnchorLabel::Negative => -1,
            AnchorLabel::Neutral => 0,
            AnchorLabel::Positive => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpnTargetConfig {
    pub positive_iou: f32,
    pub negative_iou: f32,
    /// Total anchors (positive + negative) that contribute to the loss.
    pub anchors_per_image: usize,
    pub positive_fraction: f32,
    pub std_dev: [f32; 4],
}

impl From<&MaskConfig> for RpnTargetConfig {
    fn from(cfg: &MaskConfig) -> Self {
        Self {
            positive_iou: cfg.rpn_positive_iou,
            negative_iou: cfg.rpn_negative_iou,
            anchors_per_image: cfg.rpn_train_anchors_per_image,
            positive_fraction: cfg.rpn_positive_fraction,
            std_dev: cfg.rpn_bbox_std_dev,
        }
    }
}

impl RpnTargetConfig {
    /// Maximum number of positive anchors per image.
    pub fn positive_cap(&self) -> usize {
        (self.anchors_per_image as f32 * self.positive_fraction) as usize
    }
}

#[derive(Debug, Clone)]
pub struct RpnTargets {
    /// One label per anchor.
    pub labels: Vec<AnchorLabel>,
    /// Regression targets of the positive anchors in anchor order, packed to
    /// `anchors_per_image` rows.
    pub deltas: PackedRows,
}

impl RpnTargets {
    pub fn positive_count(&self) -> usize {
        self.count(AnchorLabel::Positive)
    }

    pub fn negative_count(&self) -> usize {
        self.count(AnchorLabel::Negative)
    }

    fn count(&self, label: AnchorLabel) -> usize {
        self.labels.iter().filter(|l| **l == label).count()
    }

    pub fn labels_i64(&self) -> Vec<i64> {
        self.labels.iter().map(|l| l.as_i64()).collect()
    }
}

/// Label anchors against one image's ground-truth boxes.
///
/// Anchors whose best IoU is below `negative_iou` are negative and those at or
/// above `positive_iou` positive. The best anchor of every ground-truth box is
/// forced positive even when it clears no threshold. Forced anchors are kept
/// out of the random subsampling, so they survive the positive cap; the cap
/// applies to the remaining positives. Negatives are then subsampled to fill
/// `anchors_per_image`. With no ground truth every anchor is negative.
pub fn build_rpn_targets(
    anchors: &[BoxCoords],
    gt_boxes: &[BoxCoords],
    cfg: &RpnTargetConfig,
    rng: &mut dyn RngCore,
) -> RpnTargets {
    let mut deltas = PackedRows::new(cfg.anchors_per_image, 4);
    if gt_boxes.is_empty() {
        return RpnTargets {
            labels: vec![AnchorLabel::Negative; anchors.len()],
            deltas,
        };
    }

    let n_gt = gt_boxes.len();
    let iou = overlaps(anchors, gt_boxes);
    let mut labels = vec![AnchorLabel::Neutral; anchors.len()];
    let mut best_gt = vec![0usize; anchors.len()];

    for (a, row) in iou.chunks_exact(n_gt).enumerate() {
        let (g, max) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (g, v)| if v > best.1 { (g, v) } else { best });
        best_gt[a] = g;
        if max < cfg.negative_iou {
            labels[a] = AnchorLabel::Negative;
        } else if max >= cfg.positive_iou {
            labels[a] = AnchorLabel::Positive;
        }
    }

    let mut forced = BTreeSet::new();
    for g in 0..n_gt {
        let mut best = None;
        let mut best_iou = f32::MIN;
        for a in 0..anchors.len() {
            let v = iou[a * n_gt + g];
            if v > best_iou {
                best_iou = v;
                best = Some(a);
            }
        }
        if let Some(a) = best {
            labels[a] = AnchorLabel::Positive;
            best_gt[a] = g;
            forced.insert(a);
        }
    }

    let mut pool: Vec<usize> = (0..anchors.len())
        .filter(|a| labels[*a] == AnchorLabel::Positive && !forced.contains(a))
        .collect();
    let extra_quota = cfg.positive_cap().saturating_sub(forced.len());
    if pool.len() > extra_quota {
        pool.shuffle(rng);
        for &a in &pool[extra_quota..] {
            labels[a] = AnchorLabel::Neutral;
        }
    }

    let positives = forced.len() + pool.len().min(extra_quota);
    let negative_budget = cfg.anchors_per_image.saturating_sub(positives);
    let mut negatives: Vec<usize> = (0..anchors.len())
        .filter(|a| labels[*a] == AnchorLabel::Negative)
        .collect();
    if negatives.len() > negative_budget {
        negatives.shuffle(rng);
        for &a in &negatives[negative_budget..] {
            labels[a] = AnchorLabel::Neutral;
        }
    }

    for (a, label) in labels.iter().enumerate() {
        if *label == AnchorLabel::Positive {
            let d = encode_delta(&anchors[a], &gt_boxes[best_gt[a]], &cfg.std_dev);
            if !deltas.push(&d) {
                break;
            }
        }
    }

    RpnTargets { labels, deltas }
}
