use box_utils::{iou, AnchorSet, BoxCoords};
use burn::tensor::{Tensor, TensorData};
use data_contracts::ImageMeta;
use filters::{
    detect_batch, generate_proposals, proposals_for_image, refine_detections, DetectionConfig,
    ProposalConfig,
};

type TestBackend = burn_ndarray::NdArray<f32>;

fn proposal_cfg(proposal_count: usize, nms_threshold: f32) -> ProposalConfig {
    ProposalConfig {
        pre_nms_limit: 6000,
        nms_threshold,
        proposal_count,
        std_dev: [0.1, 0.1, 0.2, 0.2],
    }
}

fn detection_cfg() -> DetectionConfig {
    DetectionConfig {
        min_confidence: 0.7,
        nms_threshold: 0.5,
        max_instances: 100,
        std_dev: [0.1, 0.1, 0.2, 0.2],
    }
}

fn grid_anchors(n: usize) -> Vec<BoxCoords> {
    (0..n)
        .map(|i| {
            let y = (i / 4) as f32 * 0.25;
            let x = (i % 4) as f32 * 0.25;
            [y, x, y + 0.2, x + 0.2]
        })
        .collect()
}

#[test]
fn ten_disjoint_anchors_keep_top_five_in_score_order() {
    let anchors = grid_anchors(10);
    let scores: Vec<f32> = (0..10).map(|i| 0.95 - i as f32 * 0.05).collect();
    let out = proposals_for_image(&scores, &[0.0; 40], &anchors, &proposal_cfg(5, 0.7));

    assert_eq!(out.len(), 5);
    assert!(out.is_full());
    for (i, row) in out.rows().enumerate() {
        for (got, want) in row.iter().zip(&anchors[i]) {
            assert!((got - want).abs() < 1e-5, "row {i}");
        }
    }
}

#[test]
fn kept_proposals_never_overlap_above_threshold() {
    // Pairs of near-duplicate anchors, interleaved scores.
    let mut anchors = Vec::new();
    let mut scores = Vec::new();
    for (i, a) in grid_anchors(8).into_iter().enumerate() {
        anchors.push(a);
        anchors.push([a[0] + 0.01, a[1], a[2] + 0.01, a[3]]);
        scores.push(0.9 - i as f32 * 0.01);
        scores.push(0.91 - i as f32 * 0.01);
    }
    let deltas = vec![0.0; anchors.len() * 4];
    let out = proposals_for_image(&scores, &deltas, &anchors, &proposal_cfg(20, 0.7));
    assert_eq!(out.len(), 8);
    let boxes = out.boxes();
    for i in 0..boxes.len() {
        for j in i + 1..boxes.len() {
            assert!(iou(&boxes[i], &boxes[j]) <= 0.7);
        }
    }
}

#[test]
fn batched_proposals_pad_each_image() {
    let device = Default::default();
    let anchors = AnchorSet::from_normalized(grid_anchors(4), (64, 64));
    // Image 0 scores every anchor, image 1 none.
    let probs = TensorData::new(
        vec![0.1f32, 0.9, 0.2, 0.8, 0.3, 0.7, 0.4, 0.6, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        [2, 4, 2],
    );
    let probs = Tensor::<TestBackend, 3>::from_data(probs, &device);
    let deltas = Tensor::<TestBackend, 3>::zeros([2, 4, 4], &device);

    let (rows, tensor) = generate_proposals(probs, deltas, &anchors, &proposal_cfg(6, 0.7));
    assert_eq!(tensor.dims(), [2, 6, 4]);
    assert_eq!(rows[0].len(), 4);
    assert!(rows[1].is_empty());
    let flat = tensor.into_data().to_vec::<f32>().unwrap();
    assert!(flat[16..].iter().all(|v| *v == 0.0));
}

#[test]
fn same_class_overlap_keeps_the_higher_score() {
    let meta = ImageMeta::identity(1, (128, 128));
    let rois = [0.1, 0.1, 0.5, 0.5, 0.1, 0.1, 0.5, 0.46];
    assert!((iou(&[0.1, 0.1, 0.5, 0.5], &[0.1, 0.1, 0.5, 0.46]) - 0.9).abs() < 1e-3);
    let probs = [0.1, 0.9, 0.2, 0.8];
    let det = refine_detections(&rois, &probs, &[0.0; 16], 2, &meta, &detection_cfg());
    assert_eq!(det.len(), 1);
    assert_eq!(det.scores, vec![0.9]);
    assert_eq!(det.roi_indices, vec![0]);
}

#[test]
fn different_classes_may_overlap() {
    let meta = ImageMeta::identity(1, (128, 128));
    let rois = [0.1, 0.1, 0.5, 0.5, 0.1, 0.1, 0.5, 0.46];
    let probs = [0.1, 0.9, 0.0, 0.1, 0.0, 0.8];
    let det = refine_detections(&rois, &probs, &[0.0; 24], 3, &meta, &detection_cfg());
    assert_eq!(det.len(), 2);
    assert_eq!(det.class_ids, vec![1, 2]);
    assert!(det.scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn detection_count_is_capped() {
    let meta = ImageMeta::identity(0, (64, 64));
    let anchors = grid_anchors(12);
    let rois: Vec<f32> = anchors.iter().flatten().copied().collect();
    let probs: Vec<f32> = (0..12).flat_map(|i| [0.0, 0.99 - i as f32 * 0.01]).collect();
    let mut cfg = detection_cfg();
    cfg.max_instances = 3;
    let det = refine_detections(&rois, &probs, &[0.0; 96], 2, &meta, &cfg);
    assert_eq!(det.roi_indices, vec![0, 1, 2]);
    assert_eq!(det.packed().capacity(), 3);
}

#[test]
fn boxes_map_back_through_the_letterbox() {
    // A 50x100 original centred in a 100x100 square.
    let meta = ImageMeta {
        image_id: 4,
        original_shape: (50, 100),
        image_shape: (100, 100),
        window: [25.0, 0.0, 75.0, 100.0],
        scale: 1.0,
    };
    let device = Default::default();
    let y1 = 25.0f32 / 99.0;
    let y2 = 74.0f32 / 99.0;
    let rois = TensorData::new(vec![y1, 0.0, y2, 1.0], [1, 1, 4]);
    let rois = Tensor::<TestBackend, 3>::from_data(rois, &device);
    let probs = TensorData::new(vec![0.0f32, 1.0], [1, 1, 2]);
    let probs = Tensor::<TestBackend, 3>::from_data(probs, &device);
    let deltas = Tensor::<TestBackend, 3>::zeros([1, 1, 8], &device);

    let det = detect_batch(rois, probs, deltas, &[meta], &detection_cfg());
    assert_eq!(det.len(), 1);
    assert_eq!(det[0].boxes, vec![[0.0, 0.0, 50.0, 100.0]]);
}
