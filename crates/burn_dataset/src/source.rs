//! Annotation sources: where images and their instance masks come from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use box_utils::MaskPlane;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::types::{BurnDatasetError, DatasetResult};

/// One annotated object: a full-resolution binary mask and its class.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub class_id: u32,
    pub mask: MaskPlane,
}

/// Supplies images and instance annotations by id. Implementations are
/// shared across loader threads.
pub trait AnnotationSource: Send + Sync {
    fn image_ids(&self) -> Vec<u64>;
    fn load_image(&self, id: u64) -> DatasetResult<RgbImage>;
    /// Instance masks at the image's own resolution.
    fn load_instances(&self, id: u64) -> DatasetResult<Vec<Instance>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    entries: BTreeMap<u64, (RgbImage, Vec<Instance>)>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, image: RgbImage, instances: Vec<Instance>) {
        self.entries.insert(id, (image, instances));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AnnotationSource for InMemorySource {
    fn image_ids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    fn load_image(&self, id: u64) -> DatasetResult<RgbImage> {
        self.entries
            .get(&id)
            .map(|(img, _)| img.clone())
            .ok_or(BurnDatasetError::UnknownImage(id))
    }

    fn load_instances(&self, id: u64) -> DatasetResult<Vec<Instance>> {
        self.entries
            .get(&id)
            .map(|(_, inst)| inst.clone())
            .ok_or(BurnDatasetError::UnknownImage(id))
    }
}

/// Label file of a [`DirectorySource`], one per image under `labels/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEntry {
    pub image_id: u64,
    /// Image path relative to the dataset root.
    pub image: String,
    pub instances: Vec<InstanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub class_id: u32,
    /// Grayscale mask path relative to the dataset root; nonzero is foreground.
    pub mask: String,
}

/// Dataset on disk: `root/labels/*.json` label files referencing image and
/// mask files under `root`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    labels: BTreeMap<u64, LabelEntry>,
}

impl DirectorySource {
    pub fn open(root: &Path) -> DatasetResult<Self> {
        let labels_dir = root.join("labels");
        let entries = fs::read_dir(&labels_dir).map_err(|e| BurnDatasetError::Io {
            path: labels_dir.clone(),
            source: e,
        })?;
        let mut labels = BTreeMap::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path).map_err(|e| BurnDatasetError::Io {
                path: path.clone(),
                source: e,
            })?;
            let label: LabelEntry =
                serde_json::from_slice(&raw).map_err(|e| BurnDatasetError::Json {
                    path: path.clone(),
                    source: e,
                })?;
            labels.insert(label.image_id, label);
        }
        tracing::debug!(root = %root.display(), images = labels.len(), "indexed dataset");
        Ok(Self {
            root: root.to_path_buf(),
            labels,
        })
    }

    fn label(&self, id: u64) -> DatasetResult<&LabelEntry> {
        self.labels.get(&id).ok_or(BurnDatasetError::UnknownImage(id))
    }

    fn open_image(&self, rel: &str) -> DatasetResult<image::DynamicImage> {
        let path = self.root.join(rel);
        image::open(&path).map_err(|e| BurnDatasetError::Image { path, source: e })
    }
}

impl AnnotationSource for DirectorySource {
    fn image_ids(&self) -> Vec<u64> {
        self.labels.keys().copied().collect()
    }

    fn load_image(&self, id: u64) -> DatasetResult<RgbImage> {
        let label = self.label(id)?;
        Ok(self.open_image(&label.image)?.to_rgb8())
    }

    fn load_instances(&self, id: u64) -> DatasetResult<Vec<Instance>> {
        let label = self.label(id)?;
        label
            .instances
            .iter()
            .map(|inst| {
                let gray = self.open_image(&inst.mask)?.to_luma8();
                let (w, h) = gray.dimensions();
                let data = gray.pixels().map(|p| if p[0] > 0 { 1.0 } else { 0.0 }).collect();
                let mask = MaskPlane::from_vec(h as usize, w as usize, data)
                    .ok_or_else(|| BurnDatasetError::Other(format!("bad mask {}", inst.mask)))?;
                Ok(Instance {
                    class_id: inst.class_id,
                    mask,
                })
            })
            .collect()
    }
}
