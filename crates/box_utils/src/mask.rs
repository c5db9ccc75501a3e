//! Single-channel planes and the bilinear resampling used for ROI alignment,
//! mini-mask compression and mask targets.
//!
//! Resampling is lossy: a mask shrunk to a mini-mask and expanded again only
//! approximates the original, and small objects lose the most detail.

use crate::boxes::BoxCoords;

#[derive(Debug, Clone, PartialEq)]
pub struct MaskPlane {
    pub height: usize,
    pub width: usize,
    /// Row-major values, `height * width` long.
    pub data: Vec<f32>,
}

impl MaskPlane {
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![0.0; height * width],
        }
    }

    /// `None` when `data` does not hold `height * width` values.
    pub fn from_vec(height: usize, width: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == height * width).then_some(Self {
            height,
            width,
            data,
        })
    }

    pub fn get(&self, y: usize, x: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, y: usize, x: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0)
    }

    /// Pixel bounding box of the nonzero extent, max corner exclusive.
    /// All zero for a blank plane.
    pub fn bbox(&self) -> BoxCoords {
        let mut y1 = usize::MAX;
        let mut x1 = usize::MAX;
        let mut y2 = 0;
        let mut x2 = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(y, x) != 0.0 {
                    y1 = y1.min(y);
                    x1 = x1.min(x);
                    y2 = y2.max(y + 1);
                    x2 = x2.max(x + 1);
                }
            }
        }
        if y2 == 0 {
            return [0.0; 4];
        }
        [y1 as f32, x1 as f32, y2 as f32, x2 as f32]
    }

    /// Values at or above `threshold` become 1, the rest 0.
    pub fn binarize(mut self, threshold: f32) -> Self {
        for v in self.data.iter_mut() {
            *v = if *v >= threshold { 1.0 } else { 0.0 };
        }
        self
    }

    /// Corner-aligned bilinear resize of the whole plane.
    pub fn resize(&self, out_h: usize, out_w: usize) -> Self {
        crop_and_resize(self, &[0.0, 0.0, 1.0, 1.0], (out_h, out_w))
    }

    /// Copy of the pixel rectangle `[y1, y2) x [x1, x2)`, clamped to the plane.
    pub fn crop(&self, y1: usize, x1: usize, y2: usize, x2: usize) -> Self {
        let y2 = y2.min(self.height);
        let x2 = x2.min(self.width);
        let h = y2.saturating_sub(y1);
        let w = x2.saturating_sub(x1);
        let mut out = Self::zeros(h, w);
        for y in 0..h {
            let src = (y1 + y) * self.width + x1;
            out.data[y * w..(y + 1) * w].copy_from_slice(&self.data[src..src + w]);
        }
        out
    }
}

/// Bilinearly sample the normalized box `b` of a row-major `height x width`
/// plane onto an `out_h x out_w` grid written to `out`.
///
/// Sample `i` of an axis lands at `y1 * (H - 1) + i * (y2 - y1) * (H - 1) / (out_h - 1)`;
/// a single-sample axis takes the box centre. Samples outside the plane are 0,
/// and an all-zero box samples the top-left value everywhere.
pub fn crop_and_resize_into(
    src: &[f32],
    height: usize,
    width: usize,
    b: &BoxCoords,
    out_h: usize,
    out_w: usize,
    out: &mut [f32],
) {
    debug_assert_eq!(src.len(), height * width);
    debug_assert_eq!(out.len(), out_h * out_w);
    if height == 0 || width == 0 {
        out.fill(0.0);
        return;
    }
    let max_y = (height - 1) as f32;
    let max_x = (width - 1) as f32;
    let ys = sample_positions(b[0], b[2], max_y, out_h);
    let xs = sample_positions(b[1], b[3], max_x, out_w);

    for (oy, &in_y) in ys.iter().enumerate() {
        let row = &mut out[oy * out_w..(oy + 1) * out_w];
        if !(0.0..=max_y).contains(&in_y) {
            row.fill(0.0);
            continue;
        }
        let top = in_y.floor() as usize;
        let bottom = (in_y.ceil() as usize).min(height - 1);
        let y_lerp = in_y - top as f32;
        for (ox, &in_x) in xs.iter().enumerate() {
            if !(0.0..=max_x).contains(&in_x) {
                row[ox] = 0.0;
                continue;
            }
            let left = in_x.floor() as usize;
            let right = (in_x.ceil() as usize).min(width - 1);
            let x_lerp = in_x - left as f32;

            let tl = src[top * width + left];
            let tr = src[top * width + right];
            let bl = src[bottom * width + left];
            let br = src[bottom * width + right];
            let top_v = tl + (tr - tl) * x_lerp;
            let bottom_v = bl + (br - bl) * x_lerp;
            row[ox] = top_v + (bottom_v - top_v) * y_lerp;
        }
    }
}

/// Sample coordinates along one axis for the normalized span `[lo, hi]` of an
/// axis whose last pixel index is `max`.
pub fn sample_positions(lo: f32, hi: f32, max: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![0.5 * (lo + hi) * max],
        _ => {
            let step = (hi - lo) * max / (n - 1) as f32;
            (0..n).map(|i| lo * max + i as f32 * step).collect()
        }
    }
}

/// Pixel bounding box of a mask, see [`MaskPlane::bbox`].
pub fn extract_bbox(mask: &MaskPlane) -> BoxCoords {
    mask.bbox()
}

pub fn crop_and_resize(plane: &MaskPlane, b: &BoxCoords, out_shape: (usize, usize)) -> MaskPlane {
    let mut out = MaskPlane::zeros(out_shape.0, out_shape.1);
    crop_and_resize_into(
        &plane.data,
        plane.height,
        plane.width,
        b,
        out_shape.0,
        out_shape.1,
        &mut out.data,
    );
    out
}

fn pixel_bounds(bbox: &BoxCoords, shape: (usize, usize)) -> (usize, usize, usize, usize) {
    let clamp = |v: f32, max: usize| (v.round().max(0.0) as usize).min(max);
    let y1 = clamp(bbox[0], shape.0);
    let x1 = clamp(bbox[1], shape.1);
    let y2 = clamp(bbox[2], shape.0).max(y1);
    let x2 = clamp(bbox[3], shape.1).max(x1);
    (y1, x1, y2, x2)
}

/// Compress a full-image mask to a `mini_shape` plane covering only its
/// pixel bounding box.
pub fn minimize_mask(bbox_px: &BoxCoords, mask: &MaskPlane, mini_shape: (usize, usize)) -> MaskPlane {
    let (y1, x1, y2, x2) = pixel_bounds(bbox_px, (mask.height, mask.width));
    if y2 == y1 || x2 == x1 {
        return MaskPlane::zeros(mini_shape.0, mini_shape.1);
    }
    mask.crop(y1, x1, y2, x2)
        .resize(mini_shape.0, mini_shape.1)
        .binarize(0.5)
}

/// Lossy inverse of [`minimize_mask`]: resize the mini-mask back into its
/// pixel box on a blank `image_shape` plane.
pub fn expand_mask(bbox_px: &BoxCoords, mini: &MaskPlane, image_shape: (usize, usize)) -> MaskPlane {
    unmold_mask(mini, bbox_px, image_shape, 0.5)
}

/// Paste a per-region mask (probabilities or a binary mini-mask) into its
/// pixel box on a blank `image_shape` plane, binarized at `threshold`.
pub fn unmold_mask(
    mask: &MaskPlane,
    bbox_px: &BoxCoords,
    image_shape: (usize, usize),
    threshold: f32,
) -> MaskPlane {
    let mut full = MaskPlane::zeros(image_shape.0, image_shape.1);
    let (y1, x1, y2, x2) = pixel_bounds(bbox_px, image_shape);
    let (h, w) = (y2 - y1, x2 - x1);
    if h == 0 || w == 0 {
        return full;
    }
    let resized = mask.resize(h, w).binarize(threshold);
    for y in 0..h {
        let dst = (y1 + y) * image_shape.1 + x1;
        full.data[dst..dst + w].copy_from_slice(&resized.data[y * w..(y + 1) * w]);
    }
    full
}
