use crate::boxes::{iou, BoxCoords};

/// Indices sorted by descending score. The sort is stable, so equal scores
/// keep their original order. NaN ranks below every number.
pub fn argsort_desc(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| rank_key(scores[b]).total_cmp(&rank_key(scores[a])));
    order
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        // Folds -0.0 into 0.0 so the two tie.
        score + 0.0
    }
}

/// Greedy non-max suppression.
///
/// Visits boxes from highest to lowest score and drops every later box whose
/// IoU with an already kept box is strictly greater than `iou_threshold`.
/// Stops early once `max_keep` boxes are kept. Returns indices into `boxes`
/// in the order they were kept.
pub fn nms(
    boxes: &[BoxCoords],
    scores: &[f32],
    iou_threshold: f32,
    max_keep: Option<usize>,
) -> Vec<usize> {
    let n = boxes.len().min(scores.len());
    if n == 0 {
        return Vec::new();
    }
    let limit = max_keep.unwrap_or(n);
    let order = argsort_desc(&scores[..n]);

    let mut keep = Vec::with_capacity(limit.min(n));
    let mut suppressed = vec![false; n];
    for (pos, &i) in order.iter().enumerate() {
        if keep.len() >= limit {
            break;
        }
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_overlapping_lower_score() {
        let boxes = [
            [0.0, 0.0, 1.0, 1.0],
            [0.0, 0.0, 1.0, 0.95],
            [2.0, 2.0, 3.0, 3.0],
        ];
        let keep = nms(&boxes, &[0.8, 0.9, 0.7], 0.5, None);
        assert_eq!(keep, vec![1, 2]);
    }

    #[test]
    fn ties_resolve_by_original_order() {
        let boxes = [[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]];
        assert_eq!(nms(&boxes, &[0.5, 0.5], 0.5, None), vec![0]);
        assert_eq!(argsort_desc(&[0.1, 0.3, 0.3, 0.2]), vec![1, 2, 3, 0]);
    }

    #[test]
    fn nan_scores_rank_last() {
        let scores = [0.2, f32::NAN, 0.9, f32::NEG_INFINITY, f32::NAN];
        assert_eq!(argsort_desc(&scores), vec![2, 0, 1, 3, 4]);
        assert_eq!(argsort_desc(&[-0.0, 0.0]), vec![0, 1]);

        let boxes = [[0.0, 0.0, 1.0, 1.0], [2.0, 2.0, 3.0, 3.0]];
        assert_eq!(nms(&boxes, &[f32::NAN, 0.4], 0.5, None), vec![1, 0]);
    }

    #[test]
    fn respects_max_keep() {
        let boxes: Vec<BoxCoords> = (0..6)
            .map(|i| {
                let o = i as f32 * 2.0;
                [o, o, o + 1.0, o + 1.0]
            })
            .collect();
        let scores = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        assert_eq!(nms(&boxes, &scores, 0.5, Some(3)), vec![5, 4, 3]);
    }

    #[test]
    fn threshold_is_strict() {
        // IoU exactly 0.5: two unit-height boxes sharing two thirds of their width.
        let boxes = [[0.0, 0.0, 1.0, 3.0], [0.0, 1.0, 1.0, 4.0]];
        assert!((iou(&boxes[0], &boxes[1]) - 0.5).abs() < 1e-6);
        assert_eq!(nms(&boxes, &[0.9, 0.8], 0.5, None).len(), 2);
    }

    #[test]
    fn empty_input_keeps_nothing() {
        assert!(nms(&[], &[], 0.5, None).is_empty());
    }
}
