//! Kiosk state shared by the D-Bus handlers and the scan loop.
//!
//! Lock order is `facing` before `session`. Start, stop, switch and the
//! scan loop's own failure path all hold `facing` while they change what
//! the camera is doing, so they never interleave.

use crate::engine::{CameraInfo, EngineError, EngineHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use volto_core::{
    BlobStore, CropRect, Detection, FrameReport, ScanTicket, Session, SessionError, StoreError,
};
use volto_hw::FacingMode;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for KioskError {
    fn from(e: StoreError) -> Self {
        KioskError::Session(e.into())
    }
}

impl KioskError {
    pub fn kind(&self) -> &'static str {
        match self {
            KioskError::Session(e) => e.kind(),
            KioskError::Engine(e) => e.kind(),
        }
    }
}

pub struct Kiosk<B: BlobStore> {
    session: Mutex<Session<B>>,
    engine: EngineHandle,
    facing: Mutex<FacingMode>,
    frames: watch::Sender<FrameReport>,
    frame_interval: Duration,
    model_error: Option<String>,
}

impl<B: BlobStore + Send + 'static> Kiosk<B> {
    pub fn new(
        session: Session<B>,
        engine: EngineHandle,
        facing: FacingMode,
        frame_interval: Duration,
        model_error: Option<String>,
    ) -> Self {
        let (frames, _) = watch::channel(FrameReport::default());
        Self {
            session: Mutex::new(session),
            engine,
            facing: Mutex::new(facing),
            frames,
            frame_interval,
            model_error,
        }
    }

    pub fn session(&self) -> &Mutex<Session<B>> {
        &self.session
    }

    pub fn last_frame(&self) -> FrameReport {
        self.frames.borrow().clone()
    }

    pub async fn facing(&self) -> FacingMode {
        *self.facing.lock().await
    }

    /// Describe the best face in an image file. An empty `crop` means the
    /// whole image.
    pub async fn analyze(&self, image: &str, crop: &str) -> Result<Option<Detection>, KioskError> {
        let crop = match crop.trim() {
            "" => None,
            raw => Some(raw.parse::<CropRect>().map_err(EngineError::from)?),
        };
        Ok(self.engine.analyze_image(PathBuf::from(image), crop).await?)
    }

    pub async fn enroll(&self, name: &str, image: &str, crop: &str) -> Result<usize, KioskError> {
        // A missing name is reported before any model work happens.
        if name.trim().is_empty() {
            return Err(SessionError::MissingName.into());
        }
        let detection = self.analyze(image, crop).await?;
        let index = self.session.lock().await.enroll(name, detection.as_ref())?;
        Ok(index)
    }

    pub async fn add_sample(&self, person: usize, image: &str, crop: &str) -> Result<usize, KioskError> {
        self.session.lock().await.store().person(person)?;
        let detection = self.analyze(image, crop).await?;
        let index = self
            .session
            .lock()
            .await
            .enroll_into(person, detection.as_ref())?;
        Ok(index)
    }

    pub async fn target_from_image(&self, image: &str, crop: &str) -> Result<(), KioskError> {
        let detection = self.analyze(image, crop).await?;
        self.session
            .lock()
            .await
            .set_adhoc_target(detection.as_ref())?;
        Ok(())
    }

    /// Open the camera and start the scan loop. `None` keeps the current
    /// facing. Starting while already scanning restarts the stream.
    pub async fn start_scan(self: &Arc<Self>, facing: Option<FacingMode>) -> Result<CameraInfo, KioskError> {
        let mut current = self.facing.lock().await;
        if let Some(f) = facing {
            *current = f;
        }
        self.open_and_scan(*current).await
    }

    pub async fn stop_scan(&self) {
        let _control = self.facing.lock().await;
        {
            let mut session = self.session.lock().await;
            session.stop_scan();
            self.frames.send_replace(FrameReport::default());
        }
        if let Err(e) = self.engine.close_camera().await {
            tracing::warn!(error = %e, "failed to close camera");
        }
    }

    /// Flip between user and environment cameras. A running scan moves to
    /// the new camera; an idle kiosk only remembers the choice.
    pub async fn switch_camera(self: &Arc<Self>) -> Result<FacingMode, KioskError> {
        let mut current = self.facing.lock().await;
        let next = current.toggled();
        *current = next;
        tracing::info!(facing = %next, "camera switched");
        if self.session.lock().await.is_scanning() {
            self.open_and_scan(next).await?;
        }
        Ok(next)
    }

    pub async fn status(&self) -> serde_json::Value {
        let facing = self.facing().await;
        let session = self.session.lock().await;
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "profile": session.profile().name,
            "people": session.people().len(),
            "revision": session.revision(),
            "scanning": session.is_scanning(),
            "facing": facing,
            "target": session.target().map(|t| t.name()),
            "models_loaded": self.model_error.is_none(),
            "model_error": self.model_error,
        })
    }

    /// Caller holds the `facing` lock. Scanning without models would only
    /// fail on the first frame, so a load failure is reported up front.
    async fn open_and_scan(self: &Arc<Self>, facing: FacingMode) -> Result<CameraInfo, KioskError> {
        if let Some(reason) = &self.model_error {
            tracing::warn!(error = %reason, "face models unavailable; scan not started");
            return Err(EngineError::ModelLoadFailure(reason.clone()).into());
        }
        let ticket = self.session.lock().await.begin_scan();
        match self.engine.open_camera(facing).await {
            Ok(info) => {
                tokio::spawn(run_scan(Arc::clone(self), ticket));
                Ok(info)
            }
            Err(e) => {
                tracing::warn!(error = %e, facing = %facing, "camera unavailable; scan not started");
                self.session.lock().await.scan_flag().cancel();
                Err(e.into())
            }
        }
    }

    async fn abort_scan(&self, ticket: &ScanTicket, error: &EngineError) {
        let _control = self.facing.lock().await;
        if !ticket.is_live() {
            return;
        }
        tracing::error!(error = %error, "capture failed; scan stopped");
        {
            let session = self.session.lock().await;
            session.scan_flag().cancel();
            self.frames.send_replace(FrameReport::default());
        }
        if let Err(e) = self.engine.close_camera().await {
            tracing::warn!(error = %e, "failed to close camera");
        }
    }
}

/// Capture, detect and classify at a fixed cadence until the ticket goes
/// stale. A frame that arrives after the scan stopped is dropped.
async fn run_scan<B: BlobStore + Send + 'static>(kiosk: Arc<Kiosk<B>>, ticket: ScanTicket) {
    let mut tick = tokio::time::interval(kiosk.frame_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(epoch = ticket.epoch(), "scan loop started");

    loop {
        tick.tick().await;
        if !ticket.is_live() {
            break;
        }

        let detections = match kiosk.engine.detect_frame().await {
            Ok(d) => d,
            Err(e) => {
                kiosk.abort_scan(&ticket, &e).await;
                break;
            }
        };

        let session = kiosk.session.lock().await;
        if !ticket.is_live() {
            break;
        }
        let report = FrameReport::build(
            &detections,
            &session.match_engine(),
            session.display_policy(),
        );
        kiosk.frames.send_replace(report);
    }

    tracing::debug!(epoch = ticket.epoch(), "scan loop finished");
}
