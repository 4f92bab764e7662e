//! Boundary between the kiosk and the face-capability provider.
//!
//! Providers hand back [`Detection`] values that were validated once on
//! construction; nothing downstream re-checks them.

use crate::types::{Descriptor, FaceBox, Landmarks};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("descriptor contains a non-finite value at index {0}")]
    NonFiniteDescriptor(usize),
    #[error("detector score {0} outside [0, 1]")]
    ScoreOutOfRange(f32),
    #[error("face box is degenerate: {0:?}")]
    DegenerateBox(FaceBox),
    #[error("expected {expected} landmarks, got {actual}")]
    LandmarkCount { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("face model failed to load: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("provider returned an invalid detection: {0}")]
    InvalidDetection(#[from] DetectionError),
}

/// A single detected face with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    face_box: FaceBox,
    score: f32,
    descriptor: Descriptor,
    landmarks: Option<Landmarks>,
}

impl Detection {
    pub fn new(
        face_box: FaceBox,
        score: f32,
        descriptor: Vec<f32>,
        landmarks: Option<Landmarks>,
    ) -> Result<Self, DetectionError> {
        if descriptor.is_empty() {
            return Err(DetectionError::EmptyDescriptor);
        }
        if let Some(idx) = descriptor.iter().position(|v| !v.is_finite()) {
            return Err(DetectionError::NonFiniteDescriptor(idx));
        }
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(DetectionError::ScoreOutOfRange(score));
        }
        let finite = [face_box.x, face_box.y, face_box.width, face_box.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || face_box.width <= 0.0 || face_box.height <= 0.0 {
            return Err(DetectionError::DegenerateBox(face_box));
        }
        if let Some(lm) = &landmarks {
            let expected = lm.layout.point_count();
            if lm.points.len() != expected {
                return Err(DetectionError::LandmarkCount {
                    expected,
                    actual: lm.points.len(),
                });
            }
        }

        Ok(Self {
            face_box,
            score,
            descriptor: Descriptor::new(descriptor),
            landmarks,
        })
    }

    pub fn face_box(&self) -> FaceBox {
        self.face_box
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn landmarks(&self) -> Option<&Landmarks> {
        self.landmarks.as_ref()
    }
}

/// An external face-capability provider.
pub trait FaceProvider {
    /// Detect every face in a frame, each with a descriptor.
    fn detect_all(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ProviderError>;

    /// Detect the single most confident face, if any.
    fn detect_single(&mut self, image: &RgbImage) -> Result<Option<Detection>, ProviderError> {
        let faces = self.detect_all(image)?;
        Ok(faces.into_iter().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }
}
