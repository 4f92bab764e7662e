//! Image loading with an optional user-drawn crop rectangle.

use image::RgbImage;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
    #[error("crop rectangle {0} lies outside the {1}x{2} image")]
    Empty(CropRect, u32, u32),
    #[error("invalid crop {0:?}: expected x,y,width,height")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersection with a `w`x`h` image, or `None` if nothing is left.
    pub fn clamp_to(&self, w: u32, h: u32) -> Option<CropRect> {
        if self.x >= w || self.y >= h {
            return None;
        }
        let width = self.width.min(w - self.x);
        let height = self.height.min(h - self.y);
        (width > 0 && height > 0).then_some(CropRect::new(self.x, self.y, width, height))
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for CropRect {
    type Err = CropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| CropError::Parse(s.to_string()))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(CropRect::new(*x, *y, *w, *h)),
            _ => Err(CropError::Parse(s.to_string())),
        }
    }
}

/// Decode `path` into RGB and apply `rect`, clamped to the image bounds.
pub fn load_image(path: impl AsRef<Path>, rect: Option<CropRect>) -> Result<RgbImage, CropError> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|source| CropError::Decode {
            path: path.display().to_string(),
            source,
        })?
        .to_rgb8();
    tracing::debug!(path = %path.display(), width = img.width(), height = img.height(), "image decoded");
    match rect {
        Some(rect) => crop(&img, rect),
        None => Ok(img),
    }
}

pub fn crop(img: &RgbImage, rect: CropRect) -> Result<RgbImage, CropError> {
    let (w, h) = img.dimensions();
    let r = rect.clamp_to(w, h).ok_or(CropError::Empty(rect, w, h))?;
    Ok(image::imageops::crop_imm(img, r.x, r.y, r.width, r.height).to_image())
}
