use serde::{Deserialize, Serialize};

/// Per-image bookkeeping produced when an image is resized and padded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub image_id: u64,
    /// `(height, width)` before resizing.
    pub original_shape: (usize, usize),
    /// `(height, width)` after resizing and padding.
    pub image_shape: (usize, usize),
    /// Pixel area `(y1, x1, y2, x2)` of the padded image that holds the
    /// resized original; the max corner is exclusive.
    pub window: [f32; 4],
    pub scale: f32,
}

impl ImageMeta {
    /// Length of the molded vector.
    pub const LEN: usize = 10;

    /// Metadata for an image that was not resized or padded.
    pub fn identity(image_id: u64, shape: (usize, usize)) -> Self {
        Self {
            image_id,
            original_shape: shape,
            image_shape: shape,
            window: [0.0, 0.0, shape.0 as f32, shape.1 as f32],
            scale: 1.0,
        }
    }

    /// Flatten into a fixed-length row so metadata can be batched as a tensor.
    pub fn mold(&self) -> [f32; Self::LEN] {
        [
            self.image_id as f32,
            self.original_shape.0 as f32,
            self.original_shape.1 as f32,
            self.image_shape.0 as f32,
            self.image_shape.1 as f32,
            self.window[0],
            self.window[1],
            self.window[2],
            self.window[3],
            self.scale,
        ]
    }

    /// Inverse of [`ImageMeta::mold`]. Returns `None` for short rows.
    pub fn unmold(row: &[f32]) -> Option<Self> {
        if row.len() < Self::LEN {
            return None;
        }
        Some(Self {
            image_id: row[0] as u64,
            original_shape: (row[1] as usize, row[2] as usize),
            image_shape: (row[3] as usize, row[4] as usize),
            window: [row[5], row[6], row[7], row[8]],
            scale: row[9],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mold_unmold_keeps_window() {
        let meta = ImageMeta {
            image_id: 7,
            original_shape: (480, 640),
            image_shape: (1024, 1024),
            window: [128.0, 0.0, 896.0, 1024.0],
            scale: 1.6,
        };
        let back = ImageMeta::unmold(&meta.mold()).unwrap();
        assert_eq!(back, meta);
        assert!(ImageMeta::unmold(&[0.0; 3]).is_none());
    }
}
