//! Match Engine: classify a query descriptor against the gallery or a target.
//!
//! A query matches when its distance is strictly below the threshold.

use crate::types::{Descriptor, Person};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Label reported when nothing is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Distance threshold for target mode.
pub const DEFAULT_TARGET_THRESHOLD: f32 = 0.6;
/// Distance threshold for gallery mode.
pub const DEFAULT_GALLERY_THRESHOLD: f32 = 0.55;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matched: bool,
    pub label: String,
    /// Best distance seen, for logging. Not part of the decision surface.
    #[serde(skip)]
    pub distance: Option<f32>,
}

impl MatchOutcome {
    fn unknown(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }
}

/// Strategy for turning a query descriptor into an identity decision.
pub trait Classifier {
    fn classify(&self, query: &Descriptor) -> MatchOutcome;
}

/// How one label's several descriptors reduce to a single distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelDistance {
    /// Closest descriptor of the label.
    #[default]
    Nearest,
    /// Mean distance over all of the label's descriptors.
    Mean,
}

impl LabelDistance {
    fn reduce(self, query: &Descriptor, descriptors: &[Descriptor]) -> f32 {
        let distances = descriptors.iter().map(|d| query.euclidean_distance(d));
        match self {
            LabelDistance::Nearest => distances.fold(f32::INFINITY, f32::min),
            LabelDistance::Mean => {
                if descriptors.is_empty() {
                    f32::INFINITY
                } else {
                    distances.sum::<f32>() / descriptors.len() as f32
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct LabeledDescriptors {
    label: String,
    descriptors: Vec<Descriptor>,
}

/// Matcher over every enrolled person. Derived from the store, never persisted.
#[derive(Debug, Clone)]
pub struct GalleryMatcher {
    labels: Vec<LabeledDescriptors>,
    threshold: f32,
    aggregate: LabelDistance,
}

impl GalleryMatcher {
    pub fn build(people: &[Person], threshold: f32, aggregate: LabelDistance) -> Self {
        let labels = people
            .iter()
            .map(|p| LabeledDescriptors {
                label: p.name.clone(),
                descriptors: p.samples.iter().map(|s| s.descriptor.clone()).collect(),
            })
            .collect();
        Self {
            labels,
            threshold,
            aggregate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Classifier for GalleryMatcher {
    fn classify(&self, query: &Descriptor) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in self.labels.iter().enumerate() {
            let d = self.aggregate.reduce(query, &entry.descriptors);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, d)) if d < self.threshold => MatchOutcome {
                matched: true,
                label: self.labels[idx].label.clone(),
                distance: Some(d),
            },
            Some((_, d)) => MatchOutcome::unknown(d.is_finite().then_some(d)),
            None => MatchOutcome::unknown(None),
        }
    }
}

/// Matcher narrowed to a single identity.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    name: String,
    descriptors: Vec<Descriptor>,
    threshold: f32,
}

impl TargetMatcher {
    pub fn new(name: impl Into<String>, descriptors: Vec<Descriptor>, threshold: f32) -> Self {
        Self {
            name: name.into(),
            descriptors,
            threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Classifier for TargetMatcher {
    fn classify(&self, query: &Descriptor) -> MatchOutcome {
        let d = LabelDistance::Nearest.reduce(query, &self.descriptors);
        if d < self.threshold {
            MatchOutcome {
                matched: true,
                label: self.name.clone(),
                distance: Some(d),
            }
        } else {
            MatchOutcome::unknown(d.is_finite().then_some(d))
        }
    }
}

/// Cheap, cloneable snapshot of whichever mode is active.
#[derive(Debug, Clone)]
pub enum MatchEngine {
    Gallery(Arc<GalleryMatcher>),
    Target(Arc<TargetMatcher>),
}

impl MatchEngine {
    pub fn is_target(&self) -> bool {
        matches!(self, MatchEngine::Target(_))
    }
}

impl Classifier for MatchEngine {
    fn classify(&self, query: &Descriptor) -> MatchOutcome {
        match self {
            MatchEngine::Gallery(g) => g.classify(query),
            MatchEngine::Target(t) => t.classify(query),
        }
    }
}
