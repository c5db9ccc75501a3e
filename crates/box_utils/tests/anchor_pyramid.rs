use box_utils::{iou, AnchorSet};
use data_contracts::MaskConfig;

#[test]
fn default_config_covers_every_cell_of_every_level() {
    let cfg = MaskConfig::default();
    let anchors = AnchorSet::for_config(&cfg);
    let cells: usize = cfg.backbone_shapes().iter().map(|(h, w)| h * w).sum();
    assert_eq!(anchors.len(), cells * cfg.anchors_per_location());
    assert_eq!(anchors.len(), 261_888);
    assert_eq!(anchors.image_shape(), (1024, 1024));
}

#[test]
fn anchor_shapes_follow_ratios() {
    let cfg = MaskConfig {
        image_min_dim: 64,
        image_max_dim: 64,
        rpn_anchor_scales: vec![8.0, 16.0, 32.0, 64.0, 128.0],
        ..MaskConfig::default()
    };
    let anchors = AnchorSet::generate(&cfg);
    // First cell of the finest level: one anchor per ratio, equal area.
    let first: Vec<_> = anchors.boxes()[..3].to_vec();
    let area = |b: &[f32; 4]| (b[2] - b[0]) * (b[3] - b[1]);
    let heights: Vec<f32> = first.iter().map(|b| b[2] - b[0]).collect();
    assert!(heights[0] > heights[1] && heights[1] > heights[2]);
    for b in &first[1..] {
        assert!((area(b) / area(&first[0]) - 1.0).abs() < 0.05);
    }
    assert!(iou(&first[0], &first[2]) < 1.0);
}
