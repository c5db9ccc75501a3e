//! Per-image stages between the region proposal network and the heads.
//!
//! - [`proposals`]: decode, rank and suppress anchor predictions into a padded
//!   set of regions per image.
//! - [`roialign`]: resample pyramid features inside each region.
//! - [`detections`]: per-class suppression of classifier output into final
//!   detections.
//!
//! Images of a batch never share state; [`batch::map_images`] runs them in
//! parallel and returns results in batch order.

pub mod batch;
pub mod detections;
pub mod proposals;
pub mod roialign;

pub use batch::{image_rng, map_images, rows_to_tensor, tensor_rows};
pub use detections::{detect_batch, refine_detections, DetectionConfig, ImageDetections};
pub use proposals::{generate_proposals, proposals_for_image, ProposalConfig};
pub use roialign::{roi_align, roi_level};
