use data_contracts::ImageMeta;

/// `[y1, x1, y2, x2]`.
pub type BoxCoords = [f32; 4];

pub fn box_area(b: &BoxCoords) -> f32 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

pub fn iou(a: &BoxCoords, b: &BoxCoords) -> f32 {
    let inter_y0 = a[0].max(b[0]);
    let inter_x0 = a[1].max(b[1]);
    let inter_y1 = a[2].min(b[2]);
    let inter_x1 = a[3].min(b[3]);

    let inter_h = (inter_y1 - inter_y0).max(0.0);
    let inter_w = (inter_x1 - inter_x0).max(0.0);
    let inter_area = inter_h * inter_w;

    let denom = box_area(a) + box_area(b) - inter_area;
    if denom <= 0.0 {
        0.0
    } else {
        inter_area / denom
    }
}

/// IoU matrix, row-major with shape `[a.len(), b.len()]`.
pub fn overlaps(a: &[BoxCoords], b: &[BoxCoords]) -> Vec<f32> {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for ba in a {
        out.extend(b.iter().map(|bb| iou(ba, bb)));
    }
    out
}

fn center_size(b: &BoxCoords) -> (f32, f32, f32, f32) {
    let h = (b[2] - b[0]).max(f32::EPSILON);
    let w = (b[3] - b[1]).max(f32::EPSILON);
    (b[0] + 0.5 * h, b[1] + 0.5 * w, h, w)
}

/// Regression target `(dy, dx, log dh, log dw) / std_dev` that moves
/// `anchor` onto `gt`.
pub fn encode_delta(anchor: &BoxCoords, gt: &BoxCoords, std_dev: &[f32; 4]) -> [f32; 4] {
    let (cy, cx, h, w) = center_size(anchor);
    let (gy, gx, gh, gw) = center_size(gt);
    [
        (gy - cy) / h / std_dev[0],
        (gx - cx) / w / std_dev[1],
        (gh / h).ln() / std_dev[2],
        (gw / w).ln() / std_dev[3],
    ]
}

/// Inverse of [`encode_delta`].
pub fn decode_delta(anchor: &BoxCoords, delta: &[f32; 4], std_dev: &[f32; 4]) -> BoxCoords {
    let (cy, cx, h, w) = center_size(anchor);
    let cy = cy + delta[0] * std_dev[0] * h;
    let cx = cx + delta[1] * std_dev[1] * w;
    let h = h * (delta[2] * std_dev[2]).exp();
    let w = w * (delta[3] * std_dev[3]).exp();
    [cy - 0.5 * h, cx - 0.5 * w, cy + 0.5 * h, cx + 0.5 * w]
}

pub fn clip_box(b: &BoxCoords, window: &BoxCoords) -> BoxCoords {
    [
        b[0].clamp(window[0], window[2]),
        b[1].clamp(window[1], window[3]),
        b[2].clamp(window[0], window[2]),
        b[3].clamp(window[1], window[3]),
    ]
}

/// Pixel box (max corner exclusive) to normalized coordinates.
pub fn norm_box(b: &BoxCoords, shape: (usize, usize)) -> BoxCoords {
    let sh = (shape.0 as f32 - 1.0).max(1.0);
    let sw = (shape.1 as f32 - 1.0).max(1.0);
    [b[0] / sh, b[1] / sw, (b[2] - 1.0) / sh, (b[3] - 1.0) / sw]
}

/// Normalized box to rounded pixel coordinates (max corner exclusive).
pub fn denorm_box(b: &BoxCoords, shape: (usize, usize)) -> BoxCoords {
    let sh = (shape.0 as f32 - 1.0).max(1.0);
    let sw = (shape.1 as f32 - 1.0).max(1.0);
    [
        (b[0] * sh).round(),
        (b[1] * sw).round(),
        (b[2] * sh + 1.0).round(),
        (b[3] * sw + 1.0).round(),
    ]
}

/// Map a box normalized to the molded image back to pixels of the original
/// image, undoing the resize window recorded in `meta`.
pub fn unmold_box(b: &BoxCoords, meta: &ImageMeta) -> BoxCoords {
    let window = norm_box(&meta.window, meta.image_shape);
    let wh = (window[2] - window[0]).max(f32::EPSILON);
    let ww = (window[3] - window[1]).max(f32::EPSILON);
    let shifted = [
        (b[0] - window[0]) / wh,
        (b[1] - window[1]) / ww,
        (b[2] - window[0]) / wh,
        (b[3] - window[1]) / ww,
    ];
    denorm_box(&shifted, meta.original_shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STD: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

    fn close(a: &BoxCoords, b: &BoxCoords, tol: f32) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        for b in [[0.1, 0.2, 0.5, 0.9], [0.0, 0.0, 1.0, 1.0], [3.0, 4.0, 10.0, 20.0]] {
            assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn iou_is_symmetric() {
        let boxes = [
            [0.0, 0.0, 0.5, 0.5],
            [0.25, 0.25, 0.75, 0.75],
            [0.6, 0.1, 0.9, 0.3],
            [0.0, 0.0, 0.0, 0.0],
        ];
        for a in &boxes {
            for b in &boxes {
                assert_eq!(iou(a, b), iou(b, a));
            }
        }
        // Quarter overlap: 0.0625 / (0.25 + 0.25 - 0.0625).
        assert!((iou(&boxes[0], &boxes[1]) - 0.0625 / 0.4375).abs() < 1e-6);
        assert_eq!(iou(&boxes[3], &boxes[3]), 0.0);
    }

    #[test]
    fn overlaps_is_row_major() {
        let a = [[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]];
        let b = [[0.5, 0.5, 1.0, 1.0]];
        assert_eq!(overlaps(&a, &b), vec![0.0, 1.0]);
    }

    #[test]
    fn delta_round_trip() {
        let anchors = [[0.1, 0.1, 0.3, 0.4], [0.0, 0.5, 0.9, 0.6], [0.45, 0.45, 0.55, 0.55]];
        let gts = [[0.2, 0.05, 0.35, 0.5], [0.1, 0.1, 0.2, 0.9], [0.0, 0.0, 1.0, 1.0]];
        for a in &anchors {
            for g in &gts {
                let d = encode_delta(a, g, &STD);
                let back = decode_delta(a, &d, &STD);
                assert!(close(&back, g, 1e-5), "{back:?} != {g:?}");
            }
        }
    }

    #[test]
    fn identical_boxes_encode_to_zero() {
        let b = [0.2, 0.3, 0.6, 0.7];
        let d = encode_delta(&b, &b, &STD);
        assert!(d.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn clip_limits_to_window() {
        let clipped = clip_box(&[-0.2, 0.5, 1.3, 0.7], &[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(clipped, [0.0, 0.5, 1.0, 0.7]);
    }

    #[test]
    fn norm_denorm_round_trip() {
        let px = [10.0, 20.0, 50.0, 128.0];
        let n = norm_box(&px, (128, 128));
        assert!((n[3] - 1.0).abs() < 1e-6);
        assert_eq!(denorm_box(&n, (128, 128)), px);
    }

    #[test]
    fn unmold_undoes_letterbox_window() {
        // 480x640 original scaled by 1.6 into a 1024 square, padded top/bottom.
        let meta = ImageMeta {
            image_id: 0,
            original_shape: (480, 640),
            image_shape: (1024, 1024),
            window: [128.0, 0.0, 896.0, 1024.0],
            scale: 1.6,
        };
        let full = norm_box(&[128.0, 0.0, 896.0, 1024.0], (1024, 1024));
        assert_eq!(unmold_box(&full, &meta), [0.0, 0.0, 480.0, 640.0]);
    }
}
