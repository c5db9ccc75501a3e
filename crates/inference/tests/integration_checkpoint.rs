use std::env;
use std::path::PathBuf;

use data_contracts::MaskConfig;
use image::RgbImage;
use inference::{InferenceFactory, WeightSource, WEIGHTS_ENV};

#[test]
fn load_checkpoint_when_provided() {
    let ckpt = match env::var(WEIGHTS_ENV) {
        Ok(p) => PathBuf::from(p),
        Err(_) => {
            eprintln!("{WEIGHTS_ENV} not set; skipping checkpoint integration test.");
            return;
        }
    };
    let config = MaskConfig::load().expect("config");
    let detector = InferenceFactory
        .build(config, Some(&ckpt))
        .expect("detector");
    assert_eq!(detector.weights(), &WeightSource::Loaded(ckpt));
    let preds = detector.detect(&[RgbImage::new(64, 48)]).expect("detect");
    assert_eq!(preds.len(), 1);
}
