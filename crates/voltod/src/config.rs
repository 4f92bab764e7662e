use std::path::PathBuf;
use volto_hw::{CameraMap, FacingMode};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub encoder_model: String,
    /// SQLite file backing the descriptor store.
    pub db_path: PathBuf,
    /// Built-in profile name or path to a profile TOML file.
    pub profile: String,
    pub cameras: CameraMap,
    pub capture_width: u32,
    pub capture_height: u32,
    pub frame_interval_ms: u64,
    pub initial_facing: FacingMode,
}

impl Config {
    /// Load configuration from `VOLTO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let dimension = |key: &str| var(key).and_then(|v| v.trim().parse::<u32>().ok());

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("volto");

        let defaults = CameraMap::default();
        let initial_facing = match var("VOLTO_INITIAL_FACING").map(|v| v.parse::<FacingMode>()) {
            Some(Ok(facing)) => facing,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ignoring VOLTO_INITIAL_FACING");
                FacingMode::default()
            }
            None => FacingMode::default(),
        };

        Self {
            model_dir: var("VOLTO_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(volto_vision::default_model_dir),
            detector_model: var("VOLTO_DETECTOR_MODEL")
                .unwrap_or_else(|| volto_vision::DEFAULT_DETECTOR_MODEL.to_string()),
            encoder_model: var("VOLTO_ENCODER_MODEL")
                .unwrap_or_else(|| volto_vision::DEFAULT_ENCODER_MODEL.to_string()),
            db_path: var("VOLTO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("store.db")),
            profile: var("VOLTO_PROFILE").unwrap_or_else(|| "strict".to_string()),
            cameras: CameraMap {
                user: var("VOLTO_CAMERA_USER").unwrap_or(defaults.user),
                environment: var("VOLTO_CAMERA_ENVIRONMENT").unwrap_or(defaults.environment),
            },
            capture_width: dimension("VOLTO_CAPTURE_WIDTH").unwrap_or(1280),
            capture_height: dimension("VOLTO_CAPTURE_HEIGHT").unwrap_or(720),
            frame_interval_ms: var("VOLTO_FRAME_INTERVAL_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(33)
                .max(1),
            initial_facing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/kiosk")]);
        assert_eq!(c.db_path, PathBuf::from("/home/kiosk/.local/share/volto/store.db"));
        assert_eq!(c.model_dir, volto_vision::default_model_dir());
        assert_eq!(c.profile, "strict");
        assert_eq!((c.capture_width, c.capture_height), (1280, 720));
        assert_eq!(c.frame_interval_ms, 33);
        assert_eq!(c.initial_facing, FacingMode::Environment);
        assert_eq!(c.cameras, CameraMap::default());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("XDG_DATA_HOME", "/var/lib"),
            ("VOLTO_PROFILE", "lenient"),
            ("VOLTO_CAMERA_USER", "/dev/video4"),
            ("VOLTO_CAPTURE_WIDTH", "640"),
            ("VOLTO_FRAME_INTERVAL_MS", "0"),
            ("VOLTO_INITIAL_FACING", "user"),
        ]);
        assert_eq!(c.db_path, PathBuf::from("/var/lib/volto/store.db"));
        assert_eq!(c.profile, "lenient");
        assert_eq!(c.cameras.user, "/dev/video4");
        assert_eq!(c.capture_width, 640);
        assert_eq!(c.frame_interval_ms, 1);
        assert_eq!(c.initial_facing, FacingMode::User);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[("VOLTO_CAPTURE_HEIGHT", "tall"), ("VOLTO_INITIAL_FACING", "up")]);
        assert_eq!(c.capture_height, 720);
        assert_eq!(c.initial_facing, FacingMode::Environment);

        // 2^32 + 640 would wrap to 640 if narrowed after parsing.
        let c = config(&[("VOLTO_CAPTURE_WIDTH", "4294967936")]);
        assert_eq!(c.capture_width, 1280);
    }
}
