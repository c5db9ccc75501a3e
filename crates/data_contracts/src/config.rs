use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV: &str = "MASKR_CONFIG";

/// Images are downscaled by up to 2^6 inside the feature pyramid.
const SIZE_DIVISOR: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("toml parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(
        "image size {0} must be divisible by {SIZE_DIVISOR} to avoid fractions when downscaling and upscaling (use 256, 320, 384, 448, 512, ...)"
    )]
    ImageSize(usize),
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },
    #[error("rpn_negative_iou {negative} must not exceed rpn_positive_iou {positive}")]
    IouBand { negative: f32, positive: f32 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{scales} anchor scales configured for {strides} backbone strides")]
    AnchorLevels { scales: usize, strides: usize },
    #[error("num_classes must include background and at least one class, got {0}")]
    NumClasses(usize),
    #[error("mask_shape {mask:?} must be twice mask_pool_size {pool}")]
    MaskShape { mask: (usize, usize), pool: usize },
}

/// Every tunable of the pipeline. Defaults follow the COCO training setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    pub name: String,
    /// Number of classes including background (class 0).
    pub num_classes: usize,
    pub image_min_dim: usize,
    /// Images are centre-padded to an `image_max_dim` square.
    pub image_max_dim: usize,
    pub mean_pixel: [f32; 3],
    /// Pixel stride of each pyramid level, P2..P6.
    pub backbone_strides: Vec<usize>,
    /// Anchor side length per pyramid level, in pixels.
    pub rpn_anchor_scales: Vec<f32>,
    /// Anchor width/height ratios, shared by all levels.
    pub rpn_anchor_ratios: Vec<f32>,
    /// Anchor every Nth feature cell.
    pub rpn_anchor_stride: usize,
    pub rpn_nms_threshold: f32,
    pub rpn_positive_iou: f32,
    pub rpn_negative_iou: f32,
    pub rpn_train_anchors_per_image: usize,
    pub rpn_positive_fraction: f32,
    pub rpn_bbox_std_dev: [f32; 4],
    /// Top-scoring anchors kept before proposal NMS.
    pub pre_nms_limit: usize,
    pub post_nms_rois_training: usize,
    pub post_nms_rois_inference: usize,
    pub use_mini_mask: bool,
    pub mini_mask_shape: (usize, usize),
    pub train_rois_per_image: usize,
    pub roi_positive_ratio: f32,
    pub roi_positive_iou: f32,
    pub pool_size: usize,
    pub mask_pool_size: usize,
    pub mask_shape: (usize, usize),
    pub mask_threshold: f32,
    pub max_gt_instances: usize,
    pub bbox_std_dev: [f32; 4],
    pub detection_max_instances: usize,
    pub detection_min_confidence: f32,
    pub detection_nms_threshold: f32,
    pub pyramid_channels: usize,
    pub fc_layers_size: usize,
    /// When false only the region-proposal stage runs.
    pub heads_enabled: bool,
    /// Seed for anchor/ROI sampling; `None` draws fresh entropy.
    pub seed: Option<u64>,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            name: "maskr".to_string(),
            num_classes: 81,
            image_min_dim: 800,
            image_max_dim: 1024,
            mean_pixel: [123.7, 116.8, 103.9],
            backbone_strides: vec![4, 8, 16, 32, 64],
            rpn_anchor_scales: vec![32.0, 64.0, 128.0, 256.0, 512.0],
            rpn_anchor_ratios: vec![0.5, 1.0, 2.0],
            rpn_anchor_stride: 1,
            rpn_nms_threshold: 0.7,
            rpn_positive_iou: 0.7,
            rpn_negative_iou: 0.3,
            rpn_train_anchors_per_image: 256,
            rpn_positive_fraction: 0.5,
            rpn_bbox_std_dev: [0.1, 0.1, 0.2, 0.2],
            pre_nms_limit: 6000,
            post_nms_rois_training: 2000,
            post_nms_rois_inference: 1000,
            use_mini_mask: true,
            mini_mask_shape: (56, 56),
            train_rois_per_image: 200,
            roi_positive_ratio: 0.33,
            roi_positive_iou: 0.5,
            pool_size: 7,
            mask_pool_size: 14,
            mask_shape: (28, 28),
            mask_threshold: 0.5,
            max_gt_instances: 100,
            bbox_std_dev: [0.1, 0.1, 0.2, 0.2],
            detection_max_instances: 100,
            detection_min_confidence: 0.7,
            detection_nms_threshold: 0.3,
            pyramid_channels: 256,
            fc_layers_size: 1024,
            heads_enabled: true,
            seed: None,
        }
    }
}

impl MaskConfig {
    /// Load from `$MASKR_CONFIG` when set, defaults otherwise.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), name = %cfg.name, "loaded config");
        Ok(cfg)
    }

    /// `(height, width)` of every molded image.
    pub fn image_shape(&self) -> (usize, usize) {
        (self.image_max_dim, self.image_max_dim)
    }

    /// Stored shape of a ground-truth mask.
    pub fn gt_mask_shape(&self) -> (usize, usize) {
        if self.use_mini_mask {
            self.mini_mask_shape
        } else {
            self.image_shape()
        }
    }

    /// `(height, width)` of each pyramid level, in stride order.
    pub fn backbone_shapes(&self) -> Vec<(usize, usize)> {
        let (h, w) = self.image_shape();
        self.backbone_strides
            .iter()
            .map(|&s| (h.div_ceil(s), w.div_ceil(s)))
            .collect()
    }

    pub fn anchors_per_location(&self) -> usize {
        self.rpn_anchor_ratios.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (h, w) = self.image_shape();
        for side in [h, w] {
            if side == 0 || side % SIZE_DIVISOR != 0 {
                return Err(ConfigError::ImageSize(side));
            }
        }
        let unit = [
            ("rpn_nms_threshold", self.rpn_nms_threshold),
            ("rpn_positive_iou", self.rpn_positive_iou),
            ("rpn_negative_iou", self.rpn_negative_iou),
            ("rpn_positive_fraction", self.rpn_positive_fraction),
            ("roi_positive_ratio", self.roi_positive_ratio),
            ("roi_positive_iou", self.roi_positive_iou),
            ("mask_threshold", self.mask_threshold),
            ("detection_min_confidence", self.detection_min_confidence),
            ("detection_nms_threshold", self.detection_nms_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        if self.rpn_negative_iou > self.rpn_positive_iou {
            return Err(ConfigError::IouBand {
                negative: self.rpn_negative_iou,
                positive: self.rpn_positive_iou,
            });
        }
        let counts = [
            ("image_min_dim", self.image_min_dim),
            ("rpn_anchor_stride", self.rpn_anchor_stride),
            ("rpn_train_anchors_per_image", self.rpn_train_anchors_per_image),
            ("pre_nms_limit", self.pre_nms_limit),
            ("post_nms_rois_training", self.post_nms_rois_training),
            ("post_nms_rois_inference", self.post_nms_rois_inference),
            ("train_rois_per_image", self.train_rois_per_image),
            ("pool_size", self.pool_size),
            ("mask_pool_size", self.mask_pool_size),
            ("max_gt_instances", self.max_gt_instances),
            ("detection_max_instances", self.detection_max_instances),
            ("pyramid_channels", self.pyramid_channels),
            ("fc_layers_size", self.fc_layers_size),
            ("mini_mask_shape", self.mini_mask_shape.0.min(self.mini_mask_shape.1)),
            ("rpn_anchor_ratios", self.rpn_anchor_ratios.len()),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.rpn_anchor_scales.len() != self.backbone_strides.len() {
            return Err(ConfigError::AnchorLevels {
                scales: self.rpn_anchor_scales.len(),
                strides: self.backbone_strides.len(),
            });
        }
        if self.num_classes < 2 {
            return Err(ConfigError::NumClasses(self.num_classes));
        }
        let pool = self.mask_pool_size;
        if self.mask_shape != (2 * pool, 2 * pool) {
            return Err(ConfigError::MaskShape {
                mask: self.mask_shape,
                pool,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MaskConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.image_shape(), (1024, 1024));
        assert_eq!(cfg.backbone_shapes()[0], (256, 256));
        assert_eq!(cfg.backbone_shapes()[4], (16, 16));
    }

    #[test]
    fn rejects_image_not_divisible_by_64() {
        let cfg = MaskConfig {
            image_max_dim: 500,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ImageSize(500))));
    }

    #[test]
    fn rejects_threshold_outside_unit_range() {
        let cfg = MaskConfig {
            detection_nms_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfUnitRange {
                name: "detection_nms_threshold",
                ..
            })
        ));
    }

    #[test]
    fn rejects_mismatched_anchor_levels() {
        let cfg = MaskConfig {
            rpn_anchor_scales: vec![32.0],
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::AnchorLevels {
                scales: 1,
                strides: 5
            })
        ));
    }

    #[test]
    fn rejects_inverted_rpn_iou_band() {
        let cfg = MaskConfig {
            rpn_positive_iou: 0.3,
            rpn_negative_iou: 0.7,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::IouBand { .. })));

        let touching = MaskConfig {
            rpn_positive_iou: 0.5,
            rpn_negative_iou: 0.5,
            ..Default::default()
        };
        assert!(touching.validate().is_ok());
    }
}
