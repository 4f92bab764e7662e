//! volto-vision — ONNX-backed face provider for the kiosk.
//!
//! SCRFD finds faces and their five landmarks; each face is aligned to the
//! 112×112 template and encoded into a descriptor.

pub mod alignment;
pub mod detector;
pub mod encoder;

pub use detector::{DetectorError, FaceDetector, RawFace};
pub use encoder::{EncoderError, FaceEncoder};

use image::RgbImage;
use std::path::{Path, PathBuf};
use volto_core::{Detection, FaceProvider, Landmarks, ProviderError};

pub const DEFAULT_DETECTOR_MODEL: &str = "det_10g.onnx";
pub const DEFAULT_ENCODER_MODEL: &str = "mobilefacenet.onnx";

/// Where packaged models are installed.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/volto/models")
}

impl From<DetectorError> for ProviderError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(p) => ProviderError::ModelLoad(format!("detector model not found: {p}")),
            other => ProviderError::Inference(other.to_string()),
        }
    }
}

impl From<EncoderError> for ProviderError {
    fn from(e: EncoderError) -> Self {
        match e {
            EncoderError::ModelNotFound(p) => ProviderError::ModelLoad(format!("encoder model not found: {p}")),
            other => ProviderError::Inference(other.to_string()),
        }
    }
}

pub struct OnnxFaceProvider {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxFaceProvider {
    pub fn load(
        model_dir: &Path,
        detector_file: &str,
        encoder_file: &str,
        dim: usize,
    ) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(detector_file))?;
        let encoder = FaceEncoder::load(&model_dir.join(encoder_file), dim)?;
        Ok(Self { detector, encoder })
    }

    fn describe(&mut self, image: &RgbImage, face: RawFace) -> Result<Option<Detection>, ProviderError> {
        let Some(aligned) = alignment::align_face(image, &face.landmarks) else {
            tracing::debug!(score = face.score, "skipping face with collapsed landmarks");
            return Ok(None);
        };
        let descriptor = self.encoder.encode(&aligned)?;
        let detection = Detection::new(
            face.face_box,
            face.score,
            descriptor,
            Some(Landmarks::five_point(face.landmarks)),
        )?;
        Ok(Some(detection))
    }
}

impl FaceProvider for OnnxFaceProvider {
    fn detect_all(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ProviderError> {
        let faces = self.detector.detect(image)?;
        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            if let Some(det) = self.describe(image, face)? {
                out.push(det);
            }
        }
        Ok(out)
    }

    /// Only the most confident face is encoded.
    fn detect_single(&mut self, image: &RgbImage) -> Result<Option<Detection>, ProviderError> {
        match self.detector.detect(image)?.into_iter().next() {
            Some(face) => self.describe(image, face),
            None => Ok(None),
        }
    }
}
