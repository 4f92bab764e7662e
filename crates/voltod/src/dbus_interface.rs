use crate::kiosk::{Kiosk, KioskError};
use std::sync::Arc;
use volto_core::{Renamed, SampleRemoval, SessionError, SqliteBlobStore};
use volto_hw::FacingMode;
use zbus::interface;

/// D-Bus interface for the Volto kiosk daemon.
///
/// Bus name: org.volto.Kiosk1
/// Object path: /org/volto/Kiosk1
///
/// Images are passed as file paths readable by the daemon. Crops are
/// `"x,y,width,height"` in image pixels; an empty string means no crop.
/// Person and sample arguments are zero-based roster indices.
pub struct KioskService {
    kiosk: Arc<Kiosk<SqliteBlobStore>>,
}

impl KioskService {
    pub fn new(kiosk: Arc<Kiosk<SqliteBlobStore>>) -> Self {
        Self { kiosk }
    }
}

/// Caller mistakes become `InvalidArgs`; everything else is `Failed`.
/// The message always starts with the failure kind.
fn to_fdo(e: KioskError) -> zbus::fdo::Error {
    let kind = e.kind();
    let msg = format!("{kind}: {e}");
    match kind {
        "MissingName" | "NoFaceDetected" | "PoseRejected" | "MissingLandmarks" | "NameTaken"
        | "PersonNotFound" | "SampleNotFound" | "DimensionMismatch" | "NotEmpty"
        | "InvalidImage" => zbus::fdo::Error::InvalidArgs(msg),
        _ => zbus::fdo::Error::Failed(msg),
    }
}

fn session_err(e: SessionError) -> zbus::fdo::Error {
    to_fdo(e.into())
}

#[interface(name = "org.volto.Kiosk1")]
impl KioskService {
    /// Enroll a photo under `name`. Returns the person's roster index.
    async fn enroll(&self, name: &str, image: &str, crop: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(person = name, image, "enroll requested");
        let index = self.kiosk.enroll(name, image, crop).await.map_err(to_fdo)?;
        Ok(index as u32)
    }

    /// Add a photo to an existing person.
    async fn add_sample(&self, person: u32, image: &str, crop: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(person, image, "add_sample requested");
        let index = self
            .kiosk
            .add_sample(person as usize, image, crop)
            .await
            .map_err(to_fdo)?;
        Ok(index as u32)
    }

    /// Roster with per-sample quality and efficacy, as JSON.
    async fn list_people(&self) -> zbus::fdo::Result<String> {
        let roster = self.kiosk.session().lock().await.roster();
        serde_json::to_string(&roster).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove one photo. Removing a person's last photo removes the person.
    async fn remove_sample(&self, person: u32, sample: u32) -> zbus::fdo::Result<String> {
        tracing::info!(person, sample, "remove_sample requested");
        let outcome = self
            .kiosk
            .session()
            .lock()
            .await
            .remove_sample(person as usize, sample as usize)
            .map_err(session_err)?;
        let reply = match outcome {
            SampleRemoval::SampleRemoved { remaining } => {
                serde_json::json!({ "outcome": "sample_removed", "remaining": remaining })
            }
            SampleRemoval::PersonRemoved(p) => {
                serde_json::json!({ "outcome": "person_removed", "name": p.name })
            }
        };
        Ok(reply.to_string())
    }

    /// Remove a person with all their photos. Returns the removed name.
    async fn remove_person(&self, person: u32) -> zbus::fdo::Result<String> {
        tracing::info!(person, "remove_person requested");
        let removed = self
            .kiosk
            .session()
            .lock()
            .await
            .remove_person(person as usize)
            .map_err(session_err)?;
        Ok(removed.name)
    }

    async fn rename_person(&self, person: u32, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(person, new_name = name, "rename_person requested");
        let outcome = self
            .kiosk
            .session()
            .lock()
            .await
            .rename_person(person as usize, name)
            .map_err(session_err)?;
        let reply = match outcome {
            Renamed::InPlace { index } => serde_json::json!({ "index": index, "merged": false }),
            Renamed::Merged { index } => serde_json::json!({ "index": index, "merged": true }),
        };
        Ok(reply.to_string())
    }

    /// Narrow matching to one person, or pass -1 to match everyone.
    async fn select_target(&self, person: i32) -> zbus::fdo::Result<()> {
        let person = usize::try_from(person).ok();
        self.kiosk
            .session()
            .lock()
            .await
            .select_target(person)
            .map_err(session_err)
    }

    /// Narrow matching to the face found in an image, without enrolling it.
    async fn target_from_image(&self, image: &str, crop: &str) -> zbus::fdo::Result<()> {
        tracing::info!(image, "target_from_image requested");
        self.kiosk
            .target_from_image(image, crop)
            .await
            .map_err(to_fdo)
    }

    /// Start scanning. An empty `facing` keeps the current camera.
    async fn start_scan(&self, facing: &str) -> zbus::fdo::Result<String> {
        let facing = match facing.trim() {
            "" => None,
            raw => Some(
                raw.parse::<FacingMode>()
                    .map_err(zbus::fdo::Error::InvalidArgs)?,
            ),
        };
        let info = self.kiosk.start_scan(facing).await.map_err(to_fdo)?;
        serde_json::to_string(&info).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    async fn stop_scan(&self) -> zbus::fdo::Result<()> {
        self.kiosk.stop_scan().await;
        Ok(())
    }

    /// Toggle between user and environment cameras. Returns the new facing.
    async fn switch_camera(&self) -> zbus::fdo::Result<String> {
        let facing = self.kiosk.switch_camera().await.map_err(to_fdo)?;
        Ok(facing.to_string())
    }

    /// Most recent frame report, as JSON. Empty while idle.
    async fn last_frame(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.kiosk.last_frame())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Import a legacy database dump into an empty store. Returns the
    /// number of people imported.
    async fn import_legacy(&self, json: &str) -> zbus::fdo::Result<u32> {
        let count = self
            .kiosk
            .session()
            .lock()
            .await
            .import_legacy(json)
            .map_err(session_err)?;
        tracing::info!(count, "legacy database imported");
        Ok(count as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.kiosk.status().await.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use volto_core::StoreError;

    #[test]
    fn test_caller_errors_are_invalid_args() {
        let err = to_fdo(SessionError::NoFaceDetected.into());
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(ref m) if m.starts_with("NoFaceDetected: ")));

        let err = to_fdo(SessionError::from(StoreError::NameTaken("Alice".into())).into());
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(ref m) if m.starts_with("NameTaken: ")));
    }

    #[test]
    fn test_system_errors_are_failed() {
        let err = to_fdo(EngineError::ModelLoadFailure("missing".into()).into());
        assert!(matches!(err, zbus::fdo::Error::Failed(ref m) if m.starts_with("ModelLoadFailure: ")));

        let err = to_fdo(EngineError::NoCamera.into());
        assert!(matches!(err, zbus::fdo::Error::Failed(ref m) if m.starts_with("CameraAccessFailure: ")));
    }
}
