//! Dataset loading and Burn-compatible batching for Mask R-CNN training.
//!
//! This crate provides utilities for:
//! - Reading images and instance masks from an [`AnnotationSource`]
//! - Resizing images and masks to the configured square shape
//! - Building per-image ground truth and RPN targets
//! - Stacking samples into padded batch tensors

pub mod batch;
pub mod resize;
pub mod sample;
pub mod source;
pub mod types;

pub use batch::{BatchIter, BatchOptions, MaskBatch};
pub use resize::{mold_image, resize_image, resize_mask, resize_scale, Padding, Resized};
pub use sample::{load_image_gt, ImageGt, MaskSample};
pub use source::{
    AnnotationSource, DirectorySource, InMemorySource, Instance, InstanceEntry, LabelEntry,
};
pub use types::*;
