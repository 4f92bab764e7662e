//! Front/back camera selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which way the camera faces, as a browser would say it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        })
    }
}

impl FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(FacingMode::User),
            "environment" | "back" | "rear" => Ok(FacingMode::Environment),
            other => Err(format!("unknown facing mode {other:?} (user|environment)")),
        }
    }
}

/// Device node used for each facing mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraMap {
    pub user: String,
    pub environment: String,
}

impl CameraMap {
    pub fn device_for(&self, facing: FacingMode) -> &str {
        match facing {
            FacingMode::User => &self.user,
            FacingMode::Environment => &self.environment,
        }
    }
}

impl Default for CameraMap {
    fn default() -> Self {
        Self {
            user: "/dev/video0".into(),
            environment: "/dev/video2".into(),
        }
    }
}
