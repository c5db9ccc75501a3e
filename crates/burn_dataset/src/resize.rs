//! Resizing and padding of images and masks to the fixed molded shape.

use box_utils::MaskPlane;
use data_contracts::ImageMeta;
use image::imageops::FilterType;
use image::RgbImage;

/// Zero padding added on each side of a resized image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone)]
pub struct Resized {
    pub image: RgbImage,
    /// Pixel area `(y1, x1, y2, x2)` holding the resized original.
    pub window: [f32; 4],
    pub scale: f32,
    pub padding: Padding,
}

impl Resized {
    /// `(height, width)` of the content inside the padding.
    pub fn content_shape(&self) -> (usize, usize) {
        (
            (self.window[2] - self.window[0]) as usize,
            (self.window[3] - self.window[1]) as usize,
        )
    }

    pub fn meta(&self, image_id: u64, original_shape: (usize, usize)) -> ImageMeta {
        ImageMeta {
            image_id,
            original_shape,
            image_shape: (self.image.height() as usize, self.image.width() as usize),
            window: self.window,
            scale: self.scale,
        }
    }
}

/// Scale factor that brings the short side to `min_dim` without letting the
/// long side exceed `max_dim`. Never shrinks unless the long side requires it.
pub fn resize_scale(shape: (usize, usize), min_dim: usize, max_dim: usize) -> f32 {
    let (h, w) = (shape.0 as f32, shape.1 as f32);
    let short = h.min(w).max(1.0);
    let long = h.max(w).max(1.0);
    let mut scale = (min_dim as f32 / short).max(1.0);
    if (long * scale).round() > max_dim as f32 {
        scale = max_dim as f32 / long;
    }
    scale
}

/// Resize (bilinear) and centre-pad `img` into a `max_dim` square.
pub fn resize_image(img: &RgbImage, min_dim: usize, max_dim: usize) -> Resized {
    let (w, h) = img.dimensions();
    let scale = resize_scale((h as usize, w as usize), min_dim, max_dim);
    let side = max_dim as u32;
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, side);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, side);
    let resized = if (new_w, new_h) == (w, h) {
        img.clone()
    } else {
        image::imageops::resize(img, new_w, new_h, FilterType::Triangle)
    };

    let top = (side - new_h) / 2;
    let left = (side - new_w) / 2;
    let padding = Padding {
        top,
        bottom: side - new_h - top,
        left,
        right: side - new_w - left,
    };
    let mut canvas = RgbImage::new(side, side);
    image::imageops::replace(&mut canvas, &resized, left.into(), top.into());

    Resized {
        image: canvas,
        window: [
            top as f32,
            left as f32,
            (top + new_h) as f32,
            (left + new_w) as f32,
        ],
        scale,
        padding,
    }
}

/// Apply the resize of `resized` to a mask: nearest-neighbour scaling to the
/// content shape, then the same padding.
pub fn resize_mask(mask: &MaskPlane, resized: &Resized) -> MaskPlane {
    let (new_h, new_w) = resized.content_shape();
    let out_h = new_h + (resized.padding.top + resized.padding.bottom) as usize;
    let out_w = new_w + (resized.padding.left + resized.padding.right) as usize;
    let mut out = MaskPlane::zeros(out_h, out_w);
    if mask.height == 0 || mask.width == 0 {
        return out;
    }
    let sy = mask.height as f32 / new_h.max(1) as f32;
    let sx = mask.width as f32 / new_w.max(1) as f32;
    let top = resized.padding.top as usize;
    let left = resized.padding.left as usize;
    for y in 0..new_h {
        let src_y = (((y as f32 + 0.5) * sy) as usize).min(mask.height - 1);
        for x in 0..new_w {
            let src_x = (((x as f32 + 0.5) * sx) as usize).min(mask.width - 1);
            out.set(top + y, left + x, mask.get(src_y, src_x));
        }
    }
    out
}

/// Subtract the mean pixel and lay the image out as CHW `f32`.
pub fn mold_image(img: &RgbImage, mean_pixel: [f32; 3]) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * w + x) as usize;
        for c in 0..3 {
            chw[c * plane + base] = pixel[c] as f32 - mean_pixel[c];
        }
    }
    chw
}
