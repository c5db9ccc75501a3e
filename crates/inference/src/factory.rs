use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use data_contracts::MaskConfig;
use image::RgbImage;
use models::{MaskRcnn, ModelError, Prediction};

use crate::InferenceBackend;

/// Environment variable naming a weight file for [`InferenceFactory::from_env`].
pub const WEIGHTS_ENV: &str = "MASKR_WEIGHTS";

/// Where a detector's weights came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    Loaded(PathBuf),
    RandomInit,
}

/// A Mask R-CNN model ready for inference on raw images.
#[derive(Debug)]
pub struct MaskDetector<B: Backend = InferenceBackend> {
    model: MaskRcnn<B>,
    weights: WeightSource,
}

impl<B: Backend> MaskDetector<B> {
    /// Detections in each image's own pixel coordinates, one entry per image.
    pub fn detect(&self, images: &[RgbImage]) -> Result<Vec<Prediction>, ModelError> {
        self.model.predict(images)
    }

    pub fn weights(&self) -> &WeightSource {
        &self.weights
    }

    pub fn model(&self) -> &MaskRcnn<B> {
        &self.model
    }

    pub fn into_model(self) -> MaskRcnn<B> {
        self.model
    }
}

/// Builds detectors. An invalid config is fatal; a missing or unreadable
/// weight file is logged and the model keeps its random initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceFactory;

impl InferenceFactory {
    pub fn build(
        &self,
        config: MaskConfig,
        weights: Option<&Path>,
    ) -> Result<MaskDetector<InferenceBackend>, ModelError> {
        let device = <InferenceBackend as Backend>::Device::default();
        self.build_on(config, weights, &device)
    }

    pub fn build_on<B: Backend>(
        &self,
        config: MaskConfig,
        weights: Option<&Path>,
        device: &B::Device,
    ) -> Result<MaskDetector<B>, ModelError> {
        let model = MaskRcnn::<B>::new(config.clone(), device)?;
        let Some(path) = weights else {
            tracing::warn!("no checkpoint provided; starting from random initialization");
            return Ok(MaskDetector {
                model,
                weights: WeightSource::RandomInit,
            });
        };
        if !checkpoint_exists(path) {
            tracing::warn!(
                path = %path.display(),
                "checkpoint not found; starting from random initialization"
            );
            return Ok(MaskDetector {
                model,
                weights: WeightSource::RandomInit,
            });
        }
        match model.load_weights(path) {
            Ok(model) => Ok(MaskDetector {
                model,
                weights: WeightSource::Loaded(path.to_path_buf()),
            }),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load checkpoint; starting from random initialization"
                );
                Ok(MaskDetector {
                    model: MaskRcnn::<B>::new(config, device)?,
                    weights: WeightSource::RandomInit,
                })
            }
        }
    }

    /// Config from `$MASKR_CONFIG` (defaults when unset), weights from
    /// `$MASKR_WEIGHTS` when set.
    pub fn from_env(&self) -> anyhow::Result<MaskDetector<InferenceBackend>> {
        let config = MaskConfig::load()?;
        let weights = std::env::var_os(WEIGHTS_ENV).map(PathBuf::from);
        Ok(self.build(config, weights.as_deref())?)
    }
}

/// The file recorder appends its own extension, so accept either spelling.
fn checkpoint_exists(path: &Path) -> bool {
    path.exists() || path.with_extension("bin").exists()
}
