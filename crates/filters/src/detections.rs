use std::collections::BTreeMap;

use box_utils::{
    argsort_desc, box_area, clip_box, decode_delta, is_padding_row, nms, norm_box, unmold_box,
    BoxCoords, PackedRows,
};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use data_contracts::{ImageMeta, MaskConfig};

use crate::batch::{map_images, tensor_rows};

/// Width of a packed detection row: `y1, x1, y2, x2, class_id, score`.
pub const DETECTION_ROW: usize = 6;

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Threshold on the best non-background class probability. Background is
    /// left out of the argmax, so with a threshold below 0.5 a region whose
    /// background probability dominates can still be kept.
    pub min_confidence: f32,
    pub nms_threshold: f32,
    pub max_instances: usize,
    pub std_dev: [f32; 4],
}

impl From<&MaskConfig> for DetectionConfig {
    fn from(cfg: &MaskConfig) -> Self {
        Self {
            min_confidence: cfg.detection_min_confidence,
            nms_threshold: cfg.detection_nms_threshold,
            max_instances: cfg.detection_max_instances,
            std_dev: cfg.bbox_std_dev,
        }
    }
}

/// Final detections of one image, sorted by descending score.
#[derive(Debug, Clone)]
pub struct ImageDetections {
    /// Refined boxes, normalized to the molded image. These are the regions
    /// re-aligned for the mask head.
    pub rois: PackedRows,
    /// Refined boxes in original-image pixels.
    pub boxes: Vec<BoxCoords>,
    pub class_ids: Vec<u32>,
    pub scores: Vec<f32>,
    /// Index of the source ROI of every detection.
    pub roi_indices: Vec<usize>,
}

impl ImageDetections {
    pub fn empty(capacity: usize) -> Self {
        Self {
            rois: PackedRows::new(capacity, 4),
            boxes: Vec::new(),
            class_ids: Vec::new(),
            scores: Vec::new(),
            roi_indices: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Normalized detections as `[y1, x1, y2, x2, class_id, score]` rows.
    pub fn packed(&self) -> PackedRows {
        let rows = self
            .rois
            .rows()
            .zip(self.class_ids.iter().zip(&self.scores))
            .map(|(b, (c, s))| [b[0], b[1], b[2], b[3], *c as f32, *s]);
        PackedRows::from_rows(rows, self.rois.capacity(), DETECTION_ROW)
    }
}

struct Candidate {
    roi: usize,
    class_id: u32,
    score: f32,
    refined: BoxCoords,
}

/// Turn one image's classifier output into detections.
///
/// `rois` is the padded `[rows, 4]` region buffer, `probs` `[rows,
/// num_classes]` and `deltas` `[rows, num_classes, 4]`. Padding rows are
/// skipped but keep their index, so `roi_indices` refer to `rois` rows.
/// Each region takes its best non-background class; regions below
/// `min_confidence` are dropped and NMS runs per class, so boxes of different
/// classes never suppress each other.
pub fn refine_detections(
    rois: &[f32],
    probs: &[f32],
    deltas: &[f32],
    num_classes: usize,
    meta: &ImageMeta,
    cfg: &DetectionConfig,
) -> ImageDetections {
    let mut out = ImageDetections::empty(cfg.max_instances);
    if num_classes < 2 {
        return out;
    }
    let window = norm_box(&meta.window, meta.image_shape);

    let mut candidates = Vec::new();
    for (r, roi) in rois.chunks_exact(4).enumerate() {
        if is_padding_row(roi) {
            continue;
        }
        let Some(p) = probs.get(r * num_classes..(r + 1) * num_classes) else {
            break;
        };
        // Ties go to the lower class id.
        let (class_id, score) = p[1..]
            .iter()
            .enumerate()
            .fold((1, f32::MIN), |best, (i, &v)| if v > best.1 { (i + 1, v) } else { best });
        if score < cfg.min_confidence {
            continue;
        }
        let base = (r * num_classes + class_id) * 4;
        let Some(d) = deltas.get(base..base + 4) else {
            continue;
        };
        let anchor = [roi[0], roi[1], roi[2], roi[3]];
        let refined = clip_box(
            &decode_delta(&anchor, &[d[0], d[1], d[2], d[3]], &cfg.std_dev),
            &window,
        );
        if box_area(&refined) <= 0.0 {
            continue;
        }
        candidates.push(Candidate {
            roi: r,
            class_id: class_id as u32,
            score,
            refined,
        });
    }

    let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, c) in candidates.iter().enumerate() {
        by_class.entry(c.class_id).or_default().push(i);
    }
    let mut kept = Vec::new();
    for members in by_class.values() {
        let boxes: Vec<BoxCoords> = members.iter().map(|&i| candidates[i].refined).collect();
        let scores: Vec<f32> = members.iter().map(|&i| candidates[i].score).collect();
        kept.extend(
            nms(&boxes, &scores, cfg.nms_threshold, Some(cfg.max_instances))
                .into_iter()
                .map(|k| members[k]),
        );
    }
    // Candidate order breaks score ties, matching the per-class NMS order.
    kept.sort_unstable();
    let kept_scores: Vec<f32> = kept.iter().map(|&i| candidates[i].score).collect();
    let mut order = argsort_desc(&kept_scores);
    order.truncate(cfg.max_instances);

    for k in order {
        let c = &candidates[kept[k]];
        out.rois.push(&c.refined);
        out.boxes.push(unmold_box(&c.refined, meta));
        out.class_ids.push(c.class_id);
        out.scores.push(c.score);
        out.roi_indices.push(c.roi);
    }
    out
}

/// Batched [`refine_detections`].
///
/// `rois` is `[batch, rows, 4]`, `probs` `[batch, rows, num_classes]` and
/// `deltas` `[batch, rows, num_classes * 4]`.
pub fn detect_batch<B: Backend>(
    rois: Tensor<B, 3>,
    probs: Tensor<B, 3>,
    deltas: Tensor<B, 3>,
    metas: &[ImageMeta],
    cfg: &DetectionConfig,
) -> Vec<ImageDetections> {
    let num_classes = probs.dims()[2];
    let rois = tensor_rows(rois);
    let probs = tensor_rows(probs);
    let deltas = tensor_rows(deltas);
    let batch = rois.len().min(metas.len());

    let detections = map_images(batch, |b| {
        refine_detections(&rois[b], &probs[b], &deltas[b], num_classes, &metas[b], cfg)
    });
    let counts: Vec<usize> = detections.iter().map(ImageDetections::len).collect();
    tracing::debug!(?counts, "detections");
    detections
}
