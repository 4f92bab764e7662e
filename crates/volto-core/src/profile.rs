//! Behaviour profiles.
//!
//! The kiosk shipped as two diverging variants. Each is a named profile
//! here; `strict` is the default. A TOML file can override any field:
//!
//! ```toml
//! name = "site-a"
//! descriptor_dim = 128
//! display = "show_all"
//! rename = "merge"
//!
//! [matching]
//! target_threshold = 0.6
//! gallery_threshold = 0.5
//! label_distance = "mean"
//!
//! [enrollment]
//! pose_check = true
//! max_pose_offset = 0.15
//!
//! [efficacy]
//! high_above = 90
//! medium_above = 70
//! bonuses = [{ min_samples = 3, points = 5 }]
//! ```

use crate::efficacy::EfficacyPolicy;
use crate::matcher::{LabelDistance, DEFAULT_GALLERY_THRESHOLD, DEFAULT_TARGET_THRESHOLD};
use crate::overlay::DisplayPolicy;
use crate::quality::{QualityGate, DEFAULT_MAX_POSE_OFFSET};
use crate::store::RenamePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Descriptor length of the default recognition model.
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to read profile {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("profile TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub target_threshold: f32,
    pub gallery_threshold: f32,
    pub label_distance: LabelDistance,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            target_threshold: DEFAULT_TARGET_THRESHOLD,
            gallery_threshold: DEFAULT_GALLERY_THRESHOLD,
            label_distance: LabelDistance::Nearest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub pose_check: bool,
    /// Nose offset as a fraction of face width.
    pub max_pose_offset: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            pose_check: true,
            max_pose_offset: DEFAULT_MAX_POSE_OFFSET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub descriptor_dim: usize,
    pub matching: MatchingConfig,
    pub display: DisplayPolicy,
    pub enrollment: EnrollmentConfig,
    pub efficacy: EfficacyPolicy,
    pub rename: RenamePolicy,
}

impl Profile {
    /// The primary variant: pose check, redundancy bonuses, matched faces only.
    pub fn strict() -> Self {
        Self {
            name: "strict".into(),
            descriptor_dim: DEFAULT_DESCRIPTOR_DIM,
            matching: MatchingConfig::default(),
            display: DisplayPolicy::SuppressUnmatched,
            enrollment: EnrollmentConfig::default(),
            efficacy: EfficacyPolicy::with_bonuses(),
            rename: RenamePolicy::Reject,
        }
    }

    /// The other variant: no pose check, plain efficacy, every face drawn.
    pub fn lenient() -> Self {
        Self {
            name: "lenient".into(),
            display: DisplayPolicy::ShowAll,
            enrollment: EnrollmentConfig {
                pose_check: false,
                ..EnrollmentConfig::default()
            },
            efficacy: EfficacyPolicy::plain(),
            ..Self::strict()
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "strict" => Some(Self::strict()),
            "lenient" => Some(Self::lenient()),
            _ => None,
        }
    }

    /// A built-in profile name, or a path to a TOML file.
    pub fn resolve(spec: &str) -> Result<Self, ProfileError> {
        match Self::builtin(spec) {
            Some(p) => Ok(p),
            None => Self::load(spec),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let profile = Self::from_toml_str(&raw)?;
        tracing::info!(path = %path.display(), name = %profile.name, "loaded profile");
        Ok(profile)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ProfileError> {
        let profile: Profile = toml::from_str(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        let m = &self.matching;
        for (what, v) in [
            ("target_threshold", m.target_threshold),
            ("gallery_threshold", m.gallery_threshold),
            ("max_pose_offset", self.enrollment.max_pose_offset),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ProfileError::Invalid(format!("{what} must be positive, got {v}")));
            }
        }
        if self.descriptor_dim == 0 {
            return Err(ProfileError::Invalid("descriptor_dim must be non-zero".into()));
        }
        if self.efficacy.medium_above > self.efficacy.high_above {
            return Err(ProfileError::Invalid(format!(
                "efficacy medium_above ({}) exceeds high_above ({})",
                self.efficacy.medium_above, self.efficacy.high_above
            )));
        }
        if let Some(b) = self.efficacy.bonuses.iter().find(|b| b.points > 100) {
            return Err(ProfileError::Invalid(format!(
                "efficacy bonus for {} samples is {} points; at most 100 allowed",
                b.min_samples, b.points
            )));
        }
        Ok(())
    }

    pub fn quality_gate(&self) -> QualityGate {
        QualityGate::new(
            self.enrollment
                .pose_check
                .then_some(self.enrollment.max_pose_offset),
        )
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::strict()
    }
}
