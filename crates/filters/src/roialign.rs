//! Multi-level ROI alignment over a feature pyramid.
//!
//! Sampling positions and bilinear weights are computed on the host; the
//! features themselves are gathered with tensor ops, so gradients flow back
//! into the pyramid.

use std::collections::BTreeMap;

use box_utils::{sample_positions, BoxCoords};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

/// Lowest pyramid level; `feature_maps[0]` holds it.
pub const MIN_LEVEL: usize = 2;
pub const MAX_LEVEL: usize = 5;

/// Pyramid level for a normalized box.
///
/// A 224x224 region (ImageNet size) maps to level 4, each halving or doubling
/// of its side moves one level, clamped to `[2, 5]`. Zero boxes land on the
/// finest level.
pub fn roi_level(b: &BoxCoords, image_shape: (usize, usize)) -> usize {
    let h = (b[2] - b[0]).max(0.0);
    let w = (b[3] - b[1]).max(0.0);
    let image_area = (image_shape.0 * image_shape.1) as f32;
    let level = 4.0 + ((h * w).sqrt() / (224.0 / image_area.sqrt())).log2().round();
    if level.is_nan() {
        return MIN_LEVEL;
    }
    level.clamp(MIN_LEVEL as f32, MAX_LEVEL as f32) as usize
}

/// Bilinear gather plan for all regions of one `(image, level)` group.
struct Taps {
    index: [Vec<i64>; 4],
    weight: [Vec<f32>; 4],
}

impl Taps {
    fn new(capacity: usize) -> Self {
        Self {
            index: std::array::from_fn(|_| Vec::with_capacity(capacity)),
            weight: std::array::from_fn(|_| Vec::with_capacity(capacity)),
        }
    }

    /// Append the `pool x pool` samples of `b` on an `height x width` map.
    /// Samples outside the map get zero weight.
    fn push_box(&mut self, b: &BoxCoords, height: usize, width: usize, pool: usize) {
        let max_y = height.saturating_sub(1) as f32;
        let max_x = width.saturating_sub(1) as f32;
        let ys = sample_positions(b[0], b[2], max_y, pool);
        let xs = sample_positions(b[1], b[3], max_x, pool);
        for &y in &ys {
            for &x in &xs {
                let inside = height > 0
                    && width > 0
                    && (0.0..=max_y).contains(&y)
                    && (0.0..=max_x).contains(&x);
                if !inside {
                    for k in 0..4 {
                        self.index[k].push(0);
                        self.weight[k].push(0.0);
                    }
                    continue;
                }
                let top = y.floor() as usize;
                let bottom = (y.ceil() as usize).min(height - 1);
                let left = x.floor() as usize;
                let right = (x.ceil() as usize).min(width - 1);
                let ly = y - top as f32;
                let lx = x - left as f32;
                let corners = [
                    (top * width + left, (1.0 - ly) * (1.0 - lx)),
                    (top * width + right, (1.0 - ly) * lx),
                    (bottom * width + left, ly * (1.0 - lx)),
                    (bottom * width + right, ly * lx),
                ];
                for (k, (idx, w)) in corners.into_iter().enumerate() {
                    self.index[k].push(idx as i64);
                    self.weight[k].push(w);
                }
            }
        }
    }
}

/// Align regions against the pyramid `[P2, P3, P4, P5, ..]`.
///
/// `rois[i]` holds the normalized boxes of image `i`. The output is
/// `[total_rois, channels, pool, pool]`, image-major and in input order
/// within each image. Zero boxes still yield a block, sampled at the map's
/// corner. With no regions the output has zero rows.
pub fn roi_align<B: Backend>(
    feature_maps: &[Tensor<B, 4>],
    rois: &[Vec<BoxCoords>],
    pool: usize,
    image_shape: (usize, usize),
) -> Tensor<B, 4> {
    let (channels, device) = match feature_maps.first() {
        Some(map) => (map.dims()[1], map.device()),
        None => (0, Default::default()),
    };
    let total: usize = rois.iter().map(Vec::len).sum();
    if total == 0 || feature_maps.is_empty() {
        return Tensor::zeros([total, channels, pool, pool], &device);
    }

    // Group by (image, level) so each feature map is gathered once per image.
    let mut groups: BTreeMap<(usize, usize), Vec<(usize, BoxCoords)>> = BTreeMap::new();
    let mut position = 0;
    for (image, boxes) in rois.iter().enumerate() {
        for b in boxes {
            let level = roi_level(b, image_shape) - MIN_LEVEL;
            let level = level.min(feature_maps.len() - 1);
            groups.entry((image, level)).or_default().push((position, *b));
            position += 1;
        }
    }

    let samples = pool * pool;
    let mut parts = Vec::with_capacity(groups.len());
    let mut source_rows = vec![0i64; total];
    let mut row = 0i64;
    for ((image, level), members) in groups {
        let map = &feature_maps[level];
        let [batch, c, height, width] = map.dims();
        let n = members.len();
        for (pos, _) in &members {
            source_rows[*pos] = row;
            row += 1;
        }
        if image >= batch {
            parts.push(Tensor::zeros([n, c, pool, pool], &device));
            continue;
        }
        let features = map
            .clone()
            .slice([image..image + 1, 0..c, 0..height, 0..width])
            .reshape([c, height * width]);

        let mut taps = Taps::new(n * samples);
        for (_, b) in &members {
            taps.push_box(b, height, width, pool);
        }

        let mut gathered = Tensor::<B, 2>::zeros([c, n * samples], &device);
        for k in 0..4 {
            let index = Tensor::<B, 1, Int>::from_data(
                TensorData::new(std::mem::take(&mut taps.index[k]), [n * samples]),
                &device,
            );
            let weight = Tensor::<B, 2>::from_data(
                TensorData::new(std::mem::take(&mut taps.weight[k]), [1, n * samples]),
                &device,
            );
            gathered = gathered + features.clone().select(1, index) * weight;
        }
        parts.push(gathered.reshape([c, n, pool, pool]).swap_dims(0, 1));
    }

    let stacked = Tensor::cat(parts, 0);
    let order = Tensor::<B, 1, Int>::from_data(TensorData::new(source_rows, [total]), &device);
    stacked.select(0, order)
}
