#![recursion_limit = "256"]

//! Builds ready-to-run Mask R-CNN detectors, starting from random weights
//! when no usable checkpoint is available.

pub mod factory;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use factory::{InferenceFactory, MaskDetector, WeightSource, WEIGHTS_ENV};

pub mod prelude {
    pub use crate::factory::{InferenceFactory, MaskDetector, WeightSource};
    pub use crate::InferenceBackend;
}
