//! Training-target builders.
//!
//! - [`rpn`]: labels every anchor positive/neutral/negative against the ground
//!   truth and computes regression targets for the positive ones.
//! - [`head`]: samples proposals into positive and negative ROIs and builds
//!   the class, box and mask targets for the detection heads.

pub mod ground_truth;
pub mod head;
pub mod rpn;

pub use ground_truth::GroundTruth;
pub use head::{build_head_targets, HeadTargetConfig, HeadTargets};
pub use rpn::{build_rpn_targets, AnchorLabel, RpnTargetConfig, RpnTargets};
