//! Per-frame results handed to whatever draws the overlay.

use crate::detection::Detection;
use crate::matcher::Classifier;
use crate::types::FaceBox;
use serde::{Deserialize, Serialize};

/// Which faces of a frame are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPolicy {
    /// Once any face in the frame matches, drop the unmatched ones.
    #[default]
    SuppressUnmatched,
    /// Report every detected face.
    ShowAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    pub face_box: FaceBox,
    pub matched: bool,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    /// Matched faces before display filtering.
    pub matched_count: usize,
    /// Faces detected before display filtering.
    pub detected_count: usize,
}

impl FrameReport {
    pub fn build(
        detections: &[Detection],
        classifier: &impl Classifier,
        policy: DisplayPolicy,
    ) -> Self {
        let mut faces: Vec<FaceReport> = detections
            .iter()
            .map(|det| {
                let outcome = classifier.classify(det.descriptor());
                tracing::trace!(label = %outcome.label, distance = ?outcome.distance, "face classified");
                FaceReport {
                    face_box: det.face_box(),
                    matched: outcome.matched,
                    label: outcome.label,
                }
            })
            .collect();

        let matched_count = faces.iter().filter(|f| f.matched).count();
        if policy == DisplayPolicy::SuppressUnmatched && matched_count > 0 {
            faces.retain(|f| f.matched);
        }

        Self {
            faces,
            matched_count,
            detected_count: detections.len(),
        }
    }
}
