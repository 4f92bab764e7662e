//! Face descriptor extraction from aligned 112×112 RGB crops.

use crate::alignment::ALIGNED_SIZE;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
// Symmetric normalisation, unlike the detector's 128.
const PIXEL_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("encoder inference failed: {0}")]
    Inference(String),
    #[error("encoder produced {actual} values, profile expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
    dim: usize,
}

impl FaceEncoder {
    /// `dim` is the descriptor length the store was built for.
    pub fn load(model_path: &Path, dim: usize) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(
            path = %model_path.display(),
            dim,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face encoder"
        );
        Ok(Self { session, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// L2-normalised descriptor of an aligned face crop.
    pub fn encode(&mut self, aligned: &RgbImage) -> Result<Vec<f32>, EncoderError> {
        let input = to_tensor(aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::Inference(e.to_string()))?;

        if raw.len() != self.dim {
            return Err(EncoderError::DimensionMismatch {
                expected: self.dim,
                actual: raw.len(),
            });
        }
        Ok(l2_normalize(raw.to_vec()))
    }
}

fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        if x as usize >= size || y as usize >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_tensor_layout() {
        let img = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 127, 0]));
        let t = to_tensor(&img);
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert!((t[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 5, 5]] - (127.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
        assert!((t[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model() {
        assert!(matches!(
            FaceEncoder::load(Path::new("/nonexistent/encoder.onnx"), 128),
            Err(EncoderError::ModelNotFound(_))
        ));
    }
}
