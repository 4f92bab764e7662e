use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Biometric face descriptor (128 floats for the default recognition model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different dimensionality are infinitely far apart,
    /// so a malformed query can never produce a match.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One accepted enrollment capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub descriptor: Descriptor,
    /// Detector confidence in [0, 1].
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<DateTime<Utc>>,
}

impl Sample {
    pub fn new(descriptor: Descriptor, score: f32) -> Self {
        Self {
            descriptor,
            score,
            enrolled_at: Some(Utc::now()),
        }
    }
}

/// An enrolled identity. Never persisted with zero samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub samples: Vec<Sample>,
}

impl Person {
    /// Case-insensitive name comparison, the store's identity rule.
    pub fn is_named(&self, name: &str) -> bool {
        names_equal(&self.name, name)
    }
}

pub(crate) fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Face bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Which landmark scheme a provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkLayout {
    /// left eye, right eye, nose tip, left mouth corner, right mouth corner.
    FivePoint,
    /// iBUG 68-point scheme (jaw 0..=16, nose 27..=35, ...).
    Ibug68,
}

impl LandmarkLayout {
    pub fn point_count(self) -> usize {
        match self {
            LandmarkLayout::FivePoint => 5,
            LandmarkLayout::Ibug68 => 68,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub layout: LandmarkLayout,
    pub points: Vec<Point>,
}

impl Landmarks {
    pub fn five_point(points: [Point; 5]) -> Self {
        Self {
            layout: LandmarkLayout::FivePoint,
            points: points.to_vec(),
        }
    }

    pub fn nose_tip(&self) -> Option<Point> {
        let idx = match self.layout {
            LandmarkLayout::FivePoint => 2,
            LandmarkLayout::Ibug68 => 30,
        };
        self.points.get(idx).copied()
    }

    /// The left/right reference pair the nose is centred against:
    /// outermost jaw points for 68-point layouts, the eyes for 5-point ones.
    pub fn lateral_pair(&self) -> Option<(Point, Point)> {
        let (l, r) = match self.layout {
            LandmarkLayout::FivePoint => (0, 1),
            LandmarkLayout::Ibug68 => (0, 16),
        };
        Some((*self.points.get(l)?, *self.points.get(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_dimension_mismatch() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_person_name_case_insensitive() {
        let p = Person { name: "Alice".into(), samples: vec![] };
        assert!(p.is_named("alice"));
        assert!(p.is_named("ALICE"));
        assert!(!p.is_named("alicia"));
    }

    #[test]
    fn test_ibug68_accessors() {
        let points: Vec<Point> = (0..68).map(|i| Point::new(i as f32, 0.0)).collect();
        let lm = Landmarks { layout: LandmarkLayout::Ibug68, points };
        assert_eq!(lm.nose_tip().map(|p| p.x), Some(30.0));
        let (l, r) = lm.lateral_pair().unwrap();
        assert_eq!((l.x, r.x), (0.0, 16.0));
    }

    #[test]
    fn test_descriptor_serializes_as_array() {
        let d = Descriptor::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&d).unwrap(), "[0.5,-0.25]");
    }
}
