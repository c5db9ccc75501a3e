//! Burn networks and the Mask R-CNN assembly.
//!
//! The network pieces sit behind small traits so the geometric pipeline only
//! sees tensor contracts:
//! - [`FeatureExtractor`]: images to feature pyramid levels.
//! - [`RegionClassifier`]: aligned region features to class scores and box deltas.
//! - [`MaskPredictor`]: aligned region features to per-class mask probabilities.
//!
//! [`MaskRcnn`] wires them to the proposal, target and detection stages.

pub mod backbone;
pub mod error;
pub mod head;
pub mod maskrcnn;
pub mod rpn;

pub use backbone::{FeatureExtractor, SimpleFpn};
pub use error::ModelError;
pub use head::{Classifier, ClassifierOutput, MaskHead, MaskPredictor, RegionClassifier};
pub use maskrcnn::{HeadOutput, ImageOutput, MaskRcnn, MaskRcnnNet, Prediction, TrainOutput};
pub use rpn::{RpnHead, RpnOutput};

pub mod prelude {
    pub use super::{FeatureExtractor, MaskPredictor, MaskRcnn, RegionClassifier};
}
