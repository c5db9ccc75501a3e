use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use data_contracts::MaskConfig;

use crate::boxes::{norm_box, BoxCoords};

/// Pixel anchors for one pyramid level, ordered `(y, x, ratio)` so they line
/// up with the region-proposal head's output layout.
pub fn generate_anchors(
    scale: f32,
    ratios: &[f32],
    shape: (usize, usize),
    feature_stride: usize,
    anchor_stride: usize,
) -> Vec<BoxCoords> {
    let anchor_stride = anchor_stride.max(1);
    let sizes: Vec<(f32, f32)> = ratios
        .iter()
        .map(|r| {
            let root = r.sqrt();
            (scale / root, scale * root)
        })
        .collect();

    let mut out = Vec::with_capacity(
        shape.0.div_ceil(anchor_stride) * shape.1.div_ceil(anchor_stride) * sizes.len(),
    );
    for y in (0..shape.0).step_by(anchor_stride) {
        let cy = (y * feature_stride) as f32;
        for x in (0..shape.1).step_by(anchor_stride) {
            let cx = (x * feature_stride) as f32;
            for &(h, w) in &sizes {
                out.push([cy - 0.5 * h, cx - 0.5 * w, cy + 0.5 * h, cx + 0.5 * w]);
            }
        }
    }
    out
}

/// Anchors for every pyramid level, concatenated level by level.
pub fn generate_pyramid_anchors(
    scales: &[f32],
    ratios: &[f32],
    feature_shapes: &[(usize, usize)],
    feature_strides: &[usize],
    anchor_stride: usize,
) -> Vec<BoxCoords> {
    scales
        .iter()
        .zip(feature_shapes)
        .zip(feature_strides)
        .flat_map(|((&scale, &shape), &stride)| {
            generate_anchors(scale, ratios, shape, stride, anchor_stride)
        })
        .collect()
}

/// Normalized anchors for one image geometry. Cloning shares the buffer;
/// nothing hands out mutable access to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    boxes: Arc<[BoxCoords]>,
    image_shape: (usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnchorKey {
    image_shape: (usize, usize),
    scales: Vec<u32>,
    ratios: Vec<u32>,
    strides: Vec<usize>,
    anchor_stride: usize,
}

impl AnchorKey {
    fn from_config(cfg: &MaskConfig) -> Self {
        Self {
            image_shape: cfg.image_shape(),
            scales: cfg.rpn_anchor_scales.iter().map(|v| v.to_bits()).collect(),
            ratios: cfg.rpn_anchor_ratios.iter().map(|v| v.to_bits()).collect(),
            strides: cfg.backbone_strides.clone(),
            anchor_stride: cfg.rpn_anchor_stride,
        }
    }
}

static ANCHOR_CACHE: OnceLock<Mutex<HashMap<AnchorKey, AnchorSet>>> = OnceLock::new();

impl AnchorSet {
    /// Normalize pixel anchors against `image_shape`.
    pub fn from_pixels(boxes: &[BoxCoords], image_shape: (usize, usize)) -> Self {
        let normalized: Vec<BoxCoords> = boxes.iter().map(|b| norm_box(b, image_shape)).collect();
        Self {
            boxes: normalized.into(),
            image_shape,
        }
    }

    /// Wrap anchors that are already normalized.
    pub fn from_normalized(boxes: Vec<BoxCoords>, image_shape: (usize, usize)) -> Self {
        Self {
            boxes: boxes.into(),
            image_shape,
        }
    }

    /// Generate directly from the config, bypassing the cache.
    pub fn generate(cfg: &MaskConfig) -> Self {
        let pixels = generate_pyramid_anchors(
            &cfg.rpn_anchor_scales,
            &cfg.rpn_anchor_ratios,
            &cfg.backbone_shapes(),
            &cfg.backbone_strides,
            cfg.rpn_anchor_stride,
        );
        Self::from_pixels(&pixels, cfg.image_shape())
    }

    /// Anchors for `cfg`, computed once per distinct anchor geometry.
    pub fn for_config(cfg: &MaskConfig) -> Self {
        let key = AnchorKey::from_config(cfg);
        let cache = ANCHOR_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        if let Ok(guard) = cache.lock() {
            if let Some(hit) = guard.get(&key) {
                return hit.clone();
            }
        }
        let set = Self::generate(cfg);
        tracing::debug!(
            anchors = set.len(),
            image_shape = ?set.image_shape,
            "generated anchor set"
        );
        if let Ok(mut guard) = cache.lock() {
            guard.entry(key).or_insert_with(|| set.clone());
        }
        set
    }

    pub fn boxes(&self) -> &[BoxCoords] {
        &self.boxes
    }

    pub fn image_shape(&self) -> (usize, usize) {
        self.image_shape
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_anchors_are_ordered_y_x_ratio() {
        let anchors = generate_anchors(8.0, &[0.5, 1.0, 2.0], (2, 3), 4, 1);
        assert_eq!(anchors.len(), 2 * 3 * 3);
        // Square anchor at (y=0, x=1).
        assert_eq!(anchors[3 + 1], [-4.0, 0.0, 4.0, 8.0]);
        // Tall anchor (ratio 0.5) is taller than wide.
        let tall = anchors[0];
        assert!(tall[2] - tall[0] > tall[3] - tall[1]);
        // Last anchor centred at (4, 8).
        let last = anchors[anchors.len() - 2];
        assert_eq!([(last[0] + last[2]) / 2.0, (last[1] + last[3]) / 2.0], [4.0, 8.0]);
    }

    #[test]
    fn anchor_stride_skips_cells() {
        let anchors = generate_anchors(8.0, &[1.0], (4, 4), 4, 2);
        assert_eq!(anchors.len(), 4);
    }

    #[test]
    fn cached_set_matches_recomputation() {
        let cfg = MaskConfig {
            image_min_dim: 128,
            image_max_dim: 128,
            rpn_anchor_scales: vec![8.0, 16.0, 32.0, 64.0, 128.0],
            ..Default::default()
        };
        let first = AnchorSet::for_config(&cfg);
        let second = AnchorSet::for_config(&cfg);
        let fresh = AnchorSet::generate(&cfg);
        assert_eq!(first, fresh);
        assert_eq!(second, fresh);
        let expected: usize = cfg
            .backbone_shapes()
            .iter()
            .map(|(h, w)| h * w * 3)
            .sum();
        assert_eq!(first.len(), expected);
    }
}
