use std::fs;
use std::sync::Arc;

use box_utils::{norm_box, MaskPlane};
use burn_dataset::{
    load_image_gt, AnnotationSource, BatchIter, BatchOptions, BurnDatasetError, DirectorySource,
    InMemorySource, Instance, InstanceEntry, LabelEntry,
};
use data_contracts::MaskConfig;
use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;

type TestBackend = burn_ndarray::NdArray<f32>;

fn tiny_config() -> MaskConfig {
    MaskConfig {
        num_classes: 3,
        image_min_dim: 64,
        image_max_dim: 64,
        rpn_anchor_scales: vec![4.0, 8.0, 16.0, 32.0, 64.0],
        rpn_train_anchors_per_image: 32,
        mini_mask_shape: (8, 8),
        max_gt_instances: 4,
        seed: Some(7),
        ..MaskConfig::default()
    }
}

fn rect_mask(h: usize, w: usize, y: std::ops::Range<usize>, x: std::ops::Range<usize>) -> MaskPlane {
    let mut m = MaskPlane::zeros(h, w);
    for yy in y {
        for xx in x.clone() {
            m.set(yy, xx, 1.0);
        }
    }
    m
}

fn wide_image() -> RgbImage {
    RgbImage::from_pixel(64, 32, Rgb([120, 110, 100]))
}

fn source_with(count: u64) -> InMemorySource {
    let mut source = InMemorySource::new();
    for id in 0..count {
        let inst = Instance {
            class_id: 1 + (id % 2) as u32,
            mask: rect_mask(32, 64, 4..12, 8..24),
        };
        source.insert(id, wide_image(), vec![inst]);
    }
    source
}

fn ordered() -> BatchOptions {
    BatchOptions {
        shuffle: false,
        ..BatchOptions::default()
    }
}

#[test]
fn boxes_are_taken_from_the_letterboxed_mask() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let source = source_with(1);
    let mut rng = StdRng::seed_from_u64(0);
    let sample = load_image_gt(&source, 0, &cfg, &mut rng)?;

    assert_eq!(sample.image.dimensions(), (64, 64));
    assert_eq!(sample.meta.window, [16.0, 0.0, 48.0, 64.0]);
    assert_eq!(sample.gt.len(), 1);
    assert_eq!(sample.gt.class_id(0), 1);
    let want = norm_box(&[20.0, 8.0, 28.0, 24.0], (64, 64));
    assert_eq!(sample.gt.boxes.boxes()[0], want);
    // The mini-mask covers only the box, so it is solid.
    let mini = sample.gt.mask(0).expect("mask row");
    assert_eq!((mini.height, mini.width), (8, 8));
    assert!(mini.data.iter().all(|v| *v == 1.0));
    Ok(())
}

#[test]
fn background_and_vanishing_instances_are_dropped() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let mut source = InMemorySource::new();
    let instances = vec![
        Instance {
            class_id: 0,
            mask: rect_mask(32, 64, 0..8, 0..8),
        },
        Instance {
            class_id: 2,
            mask: MaskPlane::zeros(32, 64),
        },
        Instance {
            class_id: 2,
            mask: rect_mask(32, 64, 10..20, 30..40),
        },
    ];
    source.insert(5, wide_image(), instances);
    let sample = load_image_gt(&source, 5, &cfg, &mut StdRng::seed_from_u64(1))?;
    assert_eq!(sample.gt.len(), 1);
    assert_eq!(sample.gt.class_id(0), 2);
    Ok(())
}

#[test]
fn instances_beyond_capacity_are_subsampled() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let mut source = InMemorySource::new();
    let instances = (0..7)
        .map(|i| Instance {
            class_id: 1,
            mask: rect_mask(32, 64, 2..6, i * 8..i * 8 + 6),
        })
        .collect();
    source.insert(0, wide_image(), instances);
    let sample = load_image_gt(&source, 0, &cfg, &mut StdRng::seed_from_u64(3))?;
    assert_eq!(sample.gt.len(), cfg.max_gt_instances);
    // Subsampling keeps the original relative order.
    let xs: Vec<f32> = sample.gt.boxes.boxes().iter().map(|b| b[1]).collect();
    assert!(xs.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn mismatched_mask_shape_is_an_error() {
    let cfg = tiny_config();
    let mut source = InMemorySource::new();
    let inst = Instance {
        class_id: 1,
        mask: rect_mask(16, 16, 0..4, 0..4),
    };
    source.insert(9, wide_image(), vec![inst]);
    let err = load_image_gt(&source, 9, &cfg, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(
        err,
        BurnDatasetError::MaskShape {
            image_id: 9,
            expected: (32, 64),
            got: (16, 16)
        }
    ));
}

#[test]
fn batches_are_padded_to_configured_capacities() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let anchors = cfg.backbone_shapes().iter().map(|(h, w)| h * w).sum::<usize>()
        * cfg.anchors_per_location();
    let mut iter = BatchIter::new(Arc::new(source_with(3)), cfg.clone(), ordered())?;
    let device = Default::default();

    let first = iter.next_batch::<TestBackend>(2, &device)?.expect("first batch");
    assert_eq!(first.len(), 2);
    assert_eq!(first.images.dims(), [2, 3, 64, 64]);
    assert_eq!(first.image_meta.dims(), [2, 10]);
    assert_eq!(first.rpn_match.dims(), [2, anchors]);
    assert_eq!(first.rpn_bbox.dims(), [2, 32, 4]);
    assert_eq!(first.gt_class_ids.dims(), [2, 4]);
    assert_eq!(first.gt_boxes.dims(), [2, 4, 4]);
    assert_eq!(first.gt_masks.dims(), [2, 4, 8, 8]);
    assert_eq!(first.metas().iter().map(|m| m.image_id).collect::<Vec<_>>(), vec![0, 1]);
    assert!(first.metas().iter().all(|m| m.image_shape == (64, 64)));

    let classes = first.gt_class_ids.into_data().to_vec::<i64>().unwrap();
    assert_eq!(classes, vec![1, 0, 0, 0, 2, 0, 0, 0]);
    let labels = first.rpn_match.into_data().to_vec::<i64>().unwrap();
    assert!(labels.iter().all(|l| (-1..=1).contains(l)));
    assert!(labels.iter().any(|l| *l == 1));

    let last = iter.next_batch::<TestBackend>(2, &device)?.expect("short batch");
    assert_eq!(last.len(), 1);
    assert!(iter.next_batch::<TestBackend>(2, &device)?.is_none());
    Ok(())
}

#[test]
fn strict_mode_surfaces_load_errors() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let mut source = source_with(2);
    let bad = Instance {
        class_id: 1,
        mask: rect_mask(8, 8, 0..2, 0..2),
    };
    source.insert(1, wide_image(), vec![bad]);
    let device = Default::default();

    let mut strict =
        BatchIter::new(Arc::new(source.clone()), cfg.clone(), ordered())?.permissive(false);
    assert!(strict.next_batch::<TestBackend>(2, &device).is_err());

    let mut lenient = BatchIter::new(Arc::new(source), cfg, ordered())?.permissive(true);
    let batch = lenient.next_batch::<TestBackend>(2, &device)?.expect("one good sample");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.metas()[0].image_id, 0);
    Ok(())
}

#[test]
fn images_without_instances_are_skipped() -> anyhow::Result<()> {
    let cfg = tiny_config();
    let mut source = source_with(2);
    source.insert(7, wide_image(), Vec::new());
    let device = Default::default();
    let mut iter = BatchIter::new(Arc::new(source), cfg, ordered())?;
    let batch = iter.next_batch::<TestBackend>(3, &device)?.expect("batch");
    let ids: Vec<u64> = batch.metas().iter().map(|m| m.image_id).collect();
    assert_eq!(ids, vec![0, 1]);
    Ok(())
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let cfg = MaskConfig {
        image_max_dim: 100,
        ..tiny_config()
    };
    assert!(matches!(
        BatchIter::new(Arc::new(source_with(1)), cfg, ordered()),
        Err(BurnDatasetError::Config(_))
    ));
}

#[test]
fn directory_source_reads_labels_images_and_masks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    fs::create_dir_all(root.join("labels"))?;
    fs::create_dir_all(root.join("masks"))?;

    RgbImage::from_pixel(16, 8, Rgb([1, 2, 3])).save(root.join("img_3.png"))?;
    let mut gray = GrayImage::new(16, 8);
    for y in 2..5 {
        for x in 4..9 {
            gray.put_pixel(x, y, Luma([255]));
        }
    }
    gray.save(root.join("masks/img_3_0.png"))?;
    let label = LabelEntry {
        image_id: 3,
        image: "img_3.png".to_string(),
        instances: vec![InstanceEntry {
            class_id: 2,
            mask: "masks/img_3_0.png".to_string(),
        }],
    };
    fs::write(root.join("labels/img_3.json"), serde_json::to_vec(&label)?)?;
    fs::write(root.join("labels/README.txt"), b"ignored")?;

    let source = DirectorySource::open(root)?;
    assert_eq!(source.image_ids(), vec![3]);
    let image = source.load_image(3)?;
    assert_eq!(image.dimensions(), (16, 8));
    let instances = source.load_instances(3)?;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].class_id, 2);
    assert_eq!(instances[0].mask.bbox(), [2.0, 4.0, 5.0, 9.0]);
    assert!(matches!(source.load_image(4), Err(BurnDatasetError::UnknownImage(4))));
    Ok(())
}

#[test]
fn missing_labels_directory_is_an_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(
        DirectorySource::open(tmp.path()),
        Err(BurnDatasetError::Io { .. })
    ));
}
