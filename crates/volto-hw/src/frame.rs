//! Frame type and pixel-format conversion to RGB.

use image::{ImageFormat, RgbImage};

/// A captured camera frame, converted to RGB.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for {width}x{height}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn check_len(buf: &[u8], width: u32, height: u32, bpp: usize) -> Result<usize, FrameError> {
    let expected = width as usize * height as usize * bpp;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            width,
            height,
            expected,
            actual: buf.len(),
        });
    }
    Ok(expected)
}

/// BT.601 limited-range YUV to RGB.
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

/// Convert packed YUYV 4:2:2 (`[Y0 U Y1 V]` per pixel pair) to RGB.
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let len = check_len(buf, width, height, 2)?;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in buf[..len].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    // An odd pixel count leaves half a pair; the last pixel stays black.
    rgb.resize(width as usize * height as usize * 3, 0);
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        width,
        height,
        expected: len,
        actual: buf.len(),
    })
}

/// Wrap a packed RGB24 buffer.
pub fn rgb3_to_image(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let len = check_len(buf, width, height, 3)?;
    RgbImage::from_raw(width, height, buf[..len].to_vec()).ok_or(FrameError::InvalidLength {
        width,
        height,
        expected: len,
        actual: buf.len(),
    })
}

pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_grey_levels() {
        // Neutral chroma: black and white.
        let buf = [16, 128, 235, 128];
        let img = yuyv_to_rgb(&buf, 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_dominant() {
        let img = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let px = img.get_pixel(0, 0).0;
        assert!(px[0] > 230 && px[1] < 20 && px[2] < 20, "{px:?}");
    }

    #[test]
    fn test_yuyv_too_short() {
        assert!(matches!(
            yuyv_to_rgb(&[0, 0], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn test_rgb3() {
        let buf: Vec<u8> = (0..12).collect();
        let img = rgb3_to_image(&buf, 2, 2).unwrap();
        assert_eq!(img.get_pixel(1, 1), &Rgb([9, 10, 11]));
        assert!(rgb3_to_image(&buf[..11], 2, 2).is_err());
    }

    #[test]
    fn test_mjpeg_roundtrip() {
        let src = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        src.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let img = decode_mjpeg(&jpeg).unwrap();
        assert_eq!(img.dimensions(), (8, 8));
        let px = img.get_pixel(4, 4).0;
        assert!((px[0] as i32 - 200).abs() < 10);
    }

    #[test]
    fn test_mjpeg_garbage() {
        assert!(matches!(decode_mjpeg(&[0, 1, 2, 3]), Err(FrameError::Decode(_))));
    }
}
