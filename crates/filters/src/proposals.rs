use box_utils::{
    argsort_desc, box_area, clip_box, decode_delta, nms, AnchorSet, BoxCoords, PackedRows,
};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use data_contracts::MaskConfig;

use crate::batch::{map_images, rows_to_tensor, tensor_rows};

const IMAGE_BOUNDS: BoxCoords = [0.0, 0.0, 1.0, 1.0];

#[derive(Debug, Clone)]
pub struct ProposalConfig {
    /// Top-scoring anchors considered before suppression.
    pub pre_nms_limit: usize,
    pub nms_threshold: f32,
    /// Regions kept per image; also the padded output length.
    pub proposal_count: usize,
    pub std_dev: [f32; 4],
}

impl ProposalConfig {
    pub fn training(cfg: &MaskConfig) -> Self {
        Self::with_count(cfg, cfg.post_nms_rois_training)
    }

    pub fn inference(cfg: &MaskConfig) -> Self {
        Self::with_count(cfg, cfg.post_nms_rois_inference)
    }

    fn with_count(cfg: &MaskConfig, proposal_count: usize) -> Self {
        Self {
            pre_nms_limit: cfg.pre_nms_limit,
            nms_threshold: cfg.rpn_nms_threshold,
            proposal_count,
            std_dev: cfg.rpn_bbox_std_dev,
        }
    }
}

/// Proposals of one image.
///
/// `fg_scores` holds one foreground probability per anchor and `deltas` four
/// values per anchor. Anchors are ranked by score (ties by anchor order), the
/// best `pre_nms_limit` are decoded and clipped to the image, and greedy NMS
/// keeps up to `proposal_count`. Anchors with a non-positive or NaN score never
/// become proposals, nor do boxes clipped to zero area.
pub fn proposals_for_image(
    fg_scores: &[f32],
    deltas: &[f32],
    anchors: &[BoxCoords],
    cfg: &ProposalConfig,
) -> PackedRows {
    let n = anchors.len().min(fg_scores.len()).min(deltas.len() / 4);
    let mut order = argsort_desc(&fg_scores[..n]);
    order.truncate(cfg.pre_nms_limit);

    let mut boxes = Vec::with_capacity(order.len());
    let mut scores = Vec::with_capacity(order.len());
    for i in order {
        let score = fg_scores[i];
        if score.is_nan() || score <= 0.0 {
            // Sorted: everything after is non-positive or NaN as well.
            break;
        }
        let d = [deltas[i * 4], deltas[i * 4 + 1], deltas[i * 4 + 2], deltas[i * 4 + 3]];
        let b = clip_box(&decode_delta(&anchors[i], &d, &cfg.std_dev), &IMAGE_BOUNDS);
        if box_area(&b) <= 0.0 {
            continue;
        }
        boxes.push(b);
        scores.push(score);
    }

    let keep = nms(&boxes, &scores, cfg.nms_threshold, Some(cfg.proposal_count));
    PackedRows::from_rows(keep.iter().map(|&k| boxes[k]), cfg.proposal_count, 4)
}

/// Batched proposal generation.
///
/// `rpn_probs` is `[batch, anchors, 2]` (background, foreground) and
/// `rpn_deltas` `[batch, anchors, 4]`. Returns the per-image proposals and
/// their `[batch, proposal_count, 4]` zero-padded tensor.
pub fn generate_proposals<B: Backend>(
    rpn_probs: Tensor<B, 3>,
    rpn_deltas: Tensor<B, 3>,
    anchors: &AnchorSet,
    cfg: &ProposalConfig,
) -> (Vec<PackedRows>, Tensor<B, 3>) {
    let device = rpn_probs.device();
    let [batch, n_anchors, _] = rpn_probs.dims();
    let fg = rpn_probs.slice([0..batch, 0..n_anchors, 1..2]);
    let scores = tensor_rows(fg);
    let deltas = tensor_rows(rpn_deltas);

    let per_image = map_images(batch, |b| {
        proposals_for_image(&scores[b], &deltas[b], anchors.boxes(), cfg)
    });
    let kept: Vec<usize> = per_image.iter().map(PackedRows::len).collect();
    tracing::debug!(?kept, limit = cfg.proposal_count, "proposals");

    let tensor = rows_to_tensor::<B>(&per_image, cfg.proposal_count, 4, &device);
    (per_image, tensor)
}
