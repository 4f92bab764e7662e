//! Enrollment Quality Gate: decides whether a capture is fit to enroll.

use crate::detection::Detection;
use crate::types::Sample;
use thiserror::Error;

/// Default frontal-pose limit: nose offset as a fraction of face width.
pub const DEFAULT_MAX_POSE_OFFSET: f32 = 0.2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("face is not frontal enough (nose offset {offset:.2} of face width, limit {limit:.2})")]
    PoseRejected { offset: f32, limit: f32 },
    #[error("detection has no landmarks, so its pose cannot be checked")]
    MissingLandmarks,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    /// `None` disables the frontal-pose check.
    pub max_pose_offset: Option<f32>,
}

impl QualityGate {
    pub fn new(max_pose_offset: Option<f32>) -> Self {
        Self { max_pose_offset }
    }

    /// Turn a detection into an enrollable sample, or say why not.
    pub fn accept(&self, detection: Option<&Detection>) -> Result<Sample, Rejection> {
        let det = detection.ok_or(Rejection::NoFaceDetected)?;

        if let Some(limit) = self.max_pose_offset {
            let offset = pose_offset(det).ok_or(Rejection::MissingLandmarks)?;
            if offset > limit {
                tracing::debug!(offset, limit, "pose check failed");
                return Err(Rejection::PoseRejected { offset, limit });
            }
        }

        Ok(Sample::new(det.descriptor().clone(), det.score()))
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_POSE_OFFSET))
    }
}

/// Horizontal nose-tip deviation from the lateral midpoint, normalised by
/// face width so it reads the same at any image resolution.
pub fn pose_offset(det: &Detection) -> Option<f32> {
    let lm = det.landmarks()?;
    let nose = lm.nose_tip()?;
    let (left, right) = lm.lateral_pair()?;

    let mid_x = (left.x + right.x) / 2.0;
    let span = (right.x - left.x).abs();
    // Collapsed pair: use the box width instead.
    let width = if span > f32::EPSILON { span } else { det.face_box().width };

    Some((nose.x - mid_x).abs() / width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceBox, LandmarkLayout, Landmarks, Point};

    fn jaw_detection(nose_x: f32, left_x: f32, right_x: f32) -> Detection {
        let mut points = vec![Point::new(0.0, 0.0); 68];
        points[0] = Point::new(left_x, 100.0);
        points[16] = Point::new(right_x, 100.0);
        points[30] = Point::new(nose_x, 120.0);
        Detection::new(
            FaceBox { x: left_x, y: 50.0, width: right_x - left_x, height: 200.0 },
            0.93,
            vec![0.1, 0.2, 0.3],
            Some(Landmarks { layout: LandmarkLayout::Ibug68, points }),
        )
        .unwrap()
    }

    #[test]
    fn test_no_face() {
        assert_eq!(QualityGate::default().accept(None), Err(Rejection::NoFaceDetected));
    }

    #[test]
    fn test_frontal_face_accepted() {
        let det = jaw_detection(150.0, 50.0, 250.0);
        let sample = QualityGate::default().accept(Some(&det)).unwrap();
        assert_eq!(sample.descriptor.values(), &[0.1, 0.2, 0.3]);
        assert!((sample.score - 0.93).abs() < 1e-6);
        assert!(sample.enrolled_at.is_some());
    }

    #[test]
    fn test_turned_face_rejected() {
        // 60 px off centre on a 200 px wide face = 0.3.
        let det = jaw_detection(210.0, 50.0, 250.0);
        match QualityGate::default().accept(Some(&det)) {
            Err(Rejection::PoseRejected { offset, limit }) => {
                assert!((offset - 0.3).abs() < 1e-5);
                assert_eq!(limit, DEFAULT_MAX_POSE_OFFSET);
            }
            other => panic!("expected pose rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_pose_check_is_scale_invariant() {
        let small = jaw_detection(115.0, 50.0, 150.0);
        let large = jaw_detection(230.0, 100.0, 300.0);
        let a = pose_offset(&small).unwrap();
        let b = pose_offset(&large).unwrap();
        assert!((a - b).abs() < 1e-6);
        let huge = jaw_detection(1150.0, 500.0, 1500.0);
        assert!((pose_offset(&huge).unwrap() - a).abs() < 1e-6);
    }

    #[test]
    fn test_five_point_layout() {
        let lm = Landmarks::five_point([
            Point::new(40.0, 50.0),
            Point::new(80.0, 50.0),
            Point::new(61.0, 70.0),
            Point::new(45.0, 90.0),
            Point::new(75.0, 90.0),
        ]);
        let det = Detection::new(
            FaceBox { x: 20.0, y: 20.0, width: 80.0, height: 100.0 },
            0.8,
            vec![0.5],
            Some(lm),
        )
        .unwrap();
        let offset = pose_offset(&det).unwrap();
        assert!((offset - 1.0 / 40.0).abs() < 1e-6);
        assert!(QualityGate::default().accept(Some(&det)).is_ok());
    }

    #[test]
    fn test_missing_landmarks_with_check_enabled() {
        let det = Detection::new(
            FaceBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            0.8,
            vec![0.5],
            None,
        )
        .unwrap();
        assert_eq!(QualityGate::default().accept(Some(&det)), Err(Rejection::MissingLandmarks));
        assert!(QualityGate::new(None).accept(Some(&det)).is_ok());
    }

    #[test]
    fn test_disabled_gate_accepts_turned_face() {
        let det = jaw_detection(245.0, 50.0, 250.0);
        assert!(QualityGate::new(None).accept(Some(&det)).is_ok());
    }
}
