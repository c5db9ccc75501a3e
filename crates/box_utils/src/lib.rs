//! Geometric primitives shared by every stage of the pipeline.
//!
//! Boxes are `[y1, x1, y2, x2]`. Unless a function says otherwise they are in
//! normalized image coordinates, where `(0, 0)` is the top-left pixel and
//! `(1, 1)` the bottom-right one.

pub mod anchors;
pub mod boxes;
pub mod mask;
pub mod nms;
pub mod packed;

pub use anchors::{generate_anchors, generate_pyramid_anchors, AnchorSet};
pub use boxes::{
    box_area, clip_box, decode_delta, denorm_box, encode_delta, iou, norm_box, overlaps,
    unmold_box, BoxCoords,
};
pub use mask::{
    crop_and_resize, crop_and_resize_into, expand_mask, extract_bbox, minimize_mask,
    sample_positions, unmold_mask, MaskPlane,
};
pub use nms::{argsort_desc, nms};
pub use packed::{is_padding_row, stack_padded, valid_row_indices, PackedRows};
