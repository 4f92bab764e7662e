use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use volto_core::{CropError, CropRect, Detection, FaceProvider, ProviderError};
use volto_hw::{Camera, CameraMap, FacingMode};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] volto_hw::CameraError),
    #[error("face provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("face models are not loaded: {0}")]
    ModelLoadFailure(String),
    #[error("no camera is open")]
    NoCamera,
    #[error("{0}")]
    Crop(#[from] CropError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Stable name of the failure, as surfaced to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Camera(_) | EngineError::NoCamera => "CameraAccessFailure",
            EngineError::Provider(ProviderError::ModelLoad(_)) | EngineError::ModelLoadFailure(_) => {
                "ModelLoadFailure"
            }
            EngineError::Provider(_) => "InferenceFailure",
            EngineError::Crop(_) => "InvalidImage",
            EngineError::ChannelClosed => "EngineUnavailable",
        }
    }
}

/// The camera the engine has open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub facing: FacingMode,
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Messages sent from the daemon to the engine thread.
pub(crate) enum EngineRequest {
    AnalyzeImage {
        path: PathBuf,
        crop: Option<CropRect>,
        reply: oneshot::Sender<Result<Option<Detection>, EngineError>>,
    },
    OpenCamera {
        facing: FacingMode,
        reply: oneshot::Sender<Result<CameraInfo, EngineError>>,
    },
    CloseCamera {
        reply: oneshot::Sender<()>,
    },
    DetectFrame {
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Load an image file, optionally crop it, and describe its best face.
    pub async fn analyze_image(
        &self,
        path: PathBuf,
        crop: Option<CropRect>,
    ) -> Result<Option<Detection>, EngineError> {
        self.request(|reply| EngineRequest::AnalyzeImage { path, crop, reply })
            .await?
    }

    /// Open the camera for `facing`, replacing any camera already open.
    pub async fn open_camera(&self, facing: FacingMode) -> Result<CameraInfo, EngineError> {
        self.request(|reply| EngineRequest::OpenCamera { facing, reply })
            .await?
    }

    pub async fn close_camera(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::CloseCamera { reply }).await
    }

    /// Capture one frame from the open camera and detect every face in it.
    pub async fn detect_frame(&self) -> Result<Vec<Detection>, EngineError> {
        self.request(|reply| EngineRequest::DetectFrame { reply })
            .await?
    }
}

/// Camera settings the engine opens devices with.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub cameras: CameraMap,
    pub width: u32,
    pub height: u32,
}

struct Engine {
    provider: Result<Box<dyn FaceProvider + Send>, String>,
    settings: CaptureSettings,
    camera: Option<(FacingMode, Camera)>,
}

impl Engine {
    fn provider(&mut self) -> Result<&mut (dyn FaceProvider + Send), EngineError> {
        match &mut self.provider {
            Ok(p) => Ok(p.as_mut()),
            Err(reason) => Err(EngineError::ModelLoadFailure(reason.clone())),
        }
    }

    fn analyze_image(
        &mut self,
        path: PathBuf,
        crop: Option<CropRect>,
    ) -> Result<Option<Detection>, EngineError> {
        let provider = self.provider()?;
        let image = volto_core::load_image(&path, crop)?;
        let detection = provider.detect_single(&image)?;
        tracing::debug!(
            path = %path.display(),
            found = detection.is_some(),
            "image analyzed"
        );
        Ok(detection)
    }

    fn open_camera(&mut self, facing: FacingMode) -> Result<CameraInfo, EngineError> {
        // Release the current device first; the same node may be reopened.
        self.close_camera();
        let device = self.settings.cameras.device_for(facing).to_string();
        let camera = Camera::open(&device, self.settings.width, self.settings.height)?;
        let info = CameraInfo {
            facing,
            device,
            width: camera.width,
            height: camera.height,
        };
        tracing::info!(
            facing = %facing,
            device = %info.device,
            width = info.width,
            height = info.height,
            "camera opened"
        );
        self.camera = Some((facing, camera));
        Ok(info)
    }

    fn close_camera(&mut self) {
        if let Some((facing, camera)) = self.camera.take() {
            tracing::info!(facing = %facing, device = %camera.device_path, "camera closed");
        }
    }

    fn detect_frame(&mut self) -> Result<Vec<Detection>, EngineError> {
        let frame = match &self.camera {
            Some((_, camera)) => camera.capture_frame()?,
            None => return Err(EngineError::NoCamera),
        };
        let detections = self.provider()?.detect_all(&frame.image)?;
        tracing::trace!(sequence = frame.sequence, faces = detections.len(), "frame processed");
        Ok(detections)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The engine owns the face provider and the camera. A provider that failed
/// to load is kept as its error message: the daemon still serves roster
/// operations, and every request that needs the models reports why they are
/// missing.
pub fn spawn_engine(
    provider: Result<Box<dyn FaceProvider + Send>, String>,
    settings: CaptureSettings,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let mut engine = Engine {
        provider,
        settings,
        camera: None,
    };

    std::thread::Builder::new()
        .name("volto-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::AnalyzeImage { path, crop, reply } => {
                        let _ = reply.send(engine.analyze_image(path, crop));
                    }
                    EngineRequest::OpenCamera { facing, reply } => {
                        let _ = reply.send(engine.open_camera(facing));
                    }
                    EngineRequest::CloseCamera { reply } => {
                        engine.close_camera();
                        let _ = reply.send(());
                    }
                    EngineRequest::DetectFrame { reply } => {
                        let _ = reply.send(engine.detect_frame());
                    }
                }
            }
            engine.close_camera();
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use volto_core::FaceBox;

    struct FixedProvider(Vec<Detection>);

    impl FaceProvider for FixedProvider {
        fn detect_all(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn detection(score: f32) -> Detection {
        Detection::new(
            FaceBox {
                x: 1.0,
                y: 1.0,
                width: 2.0,
                height: 2.0,
            },
            score,
            vec![0.5, 0.5],
            None,
        )
        .unwrap()
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            cameras: CameraMap {
                user: "/dev/video-volto-missing-user".into(),
                environment: "/dev/video-volto-missing-env".into(),
            },
            width: 640,
            height: 480,
        }
    }

    fn temp_png(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("voltod-{}-{name}.png", std::process::id()));
        RgbImage::new(16, 16).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_analyze_image_picks_best_face() {
        let provider = FixedProvider(vec![detection(0.6), detection(0.9)]);
        let engine = spawn_engine(Ok(Box::new(provider)), settings());
        let path = temp_png("best");
        let det = engine.analyze_image(path.clone(), None).await.unwrap();
        assert_eq!(det.map(|d| d.score()), Some(0.9));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_missing_models_reported() {
        let engine = spawn_engine(Err("mobilefacenet.onnx not found".into()), settings());
        let path = temp_png("nomodel");
        let err = engine.analyze_image(path.clone(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelLoadFailure(_)));
        assert_eq!(err.kind(), "ModelLoadFailure");
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_unreadable_image() {
        let engine = spawn_engine(Ok(Box::new(FixedProvider(vec![]))), settings());
        let err = engine
            .analyze_image(PathBuf::from("/nonexistent/volto.png"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidImage");
    }

    #[tokio::test]
    async fn test_camera_errors() {
        let engine = spawn_engine(Ok(Box::new(FixedProvider(vec![]))), settings());
        let err = engine.detect_frame().await.unwrap_err();
        assert!(matches!(err, EngineError::NoCamera));

        let err = engine.open_camera(FacingMode::User).await.unwrap_err();
        assert!(matches!(err, EngineError::Camera(volto_hw::CameraError::DeviceNotFound(_))));
        assert_eq!(err.kind(), "CameraAccessFailure");

        engine.close_camera().await.unwrap();
    }
}
