//! SCRFD face detector via ONNX Runtime.
//!
//! Runs on RGB frames letterboxed to 640×640, decodes the three stride
//! heads (two anchors per cell) and suppresses overlaps with greedy NMS.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;
use volto_core::{FaceBox, Point};

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face as the detector sees it, before any descriptor is computed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFace {
    pub face_box: FaceBox,
    pub score: f32,
    /// Left eye, right eye, nose tip, left mouth corner, right mouth corner.
    pub landmarks: [Point; 5],
}

/// Mapping between letterboxed model space and source image space.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled(width, height, scale);
        Self {
            scale,
            pad_x: ((INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE - new_h) / 2) as f32,
        }
    }

    fn scaled(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        (w, h)
    }

    fn to_source(&self, x: f32, y: f32) -> Point {
        Point::new((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Where each head lives in the model's output list, indexed by stride slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLayout {
    score: [usize; 3],
    bbox: [usize; 3],
    kps: [usize; 3],
}

impl OutputLayout {
    /// Exports either name their heads `score_8`, `bbox_16`, `kps_32`, ...
    /// or use opaque numeric names in score/bbox/kps order.
    fn from_names(names: &[String]) -> Self {
        let lookup = |head: &str| -> Option<[usize; 3]> {
            let mut out = [0usize; 3];
            for (slot, stride) in STRIDES.iter().enumerate() {
                let wanted = format!("{head}_{stride}");
                out[slot] = names.iter().position(|n| *n == wanted)?;
            }
            Some(out)
        };

        match (lookup("score"), lookup("bbox"), lookup("kps")) {
            (Some(score), Some(bbox), Some(kps)) => Self { score, bbox, kps },
            _ => {
                tracing::debug!(?names, "unrecognised SCRFD output names, assuming positional order");
                Self {
                    score: [0, 1, 2],
                    bbox: [3, 4, 5],
                    kps: [6, 7, 8],
                }
            }
        }
    }
}

pub struct FaceDetector {
    session: Session,
    layout: OutputLayout,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::Inference(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }
        let layout = OutputLayout::from_names(&names);
        tracing::info!(path = %model_path.display(), ?layout, "loaded SCRFD detector");

        Ok(Self { session, layout })
    }

    /// Faces in `image`, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawFace>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let extract = |idx: usize, head: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::Inference(format!("{head} stride {stride}: {e}")))
            };
            let scores = extract(self.layout.score[slot], "score")?;
            let bboxes = extract(self.layout.bbox[slot], "bbox")?;
            let kps = extract(self.layout.kps[slot], "kps")?;
            faces.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let mut faces = nms(faces, NMS_IOU);
        for f in &mut faces {
            clamp_box(&mut f.face_box, width as f32, height as f32);
        }
        faces.retain(|f| f.face_box.width > 0.0 && f.face_box.height > 0.0);
        tracing::debug!(faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a normalised 1×3×640×640 tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let letterbox = Letterbox::fit(width, height);
    let (new_w, new_h) = Letterbox::scaled(width, height, letterbox.scale);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Zero is the normalised value of the padding colour.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, oy + y as usize, ox + x as usize]] =
                (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: u32,
    letterbox: &Letterbox,
) -> Vec<RawFace> {
    let cells_x = (INPUT_SIZE / stride) as usize;
    let cells_y = cells_x;
    let s = stride as f32;

    (0..cells_x * cells_y * ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *scores.get(anchor)?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % cells_x) as f32 * s;
            let cy = (cell / cells_x) as f32 * s;

            let d = bboxes.get(anchor * 4..anchor * 4 + 4)?;
            let top_left = letterbox.to_source(cx - d[0] * s, cy - d[1] * s);
            let bottom_right = letterbox.to_source(cx + d[2] * s, cy + d[3] * s);

            let k = kps.get(anchor * 10..anchor * 10 + 10)?;
            let landmarks: [Point; 5] =
                std::array::from_fn(|i| letterbox.to_source(cx + k[2 * i] * s, cy + k[2 * i + 1] * s));

            Some(RawFace {
                face_box: FaceBox {
                    x: top_left.x,
                    y: top_left.y,
                    width: bottom_right.x - top_left.x,
                    height: bottom_right.y - top_left.y,
                },
                score: score.min(1.0),
                landmarks,
            })
        })
        .collect()
}

fn clamp_box(b: &mut FaceBox, width: f32, height: f32) {
    let x1 = b.x.clamp(0.0, width);
    let y1 = b.y.clamp(0.0, height);
    let x2 = (b.x + b.width).clamp(0.0, width);
    let y2 = (b.y + b.height).clamp(0.0, height);
    *b = FaceBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    };
}

/// Greedy non-maximum suppression; the survivors come back sorted by score.
fn nms(mut faces: Vec<RawFace>, iou_limit: f32) -> Vec<RawFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| iou(&k.face_box, &face.face_box) <= iou_limit) {
            kept.push(face);
        }
    }
    kept
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x: f32, y: f32, w: f32, h: f32, score: f32) -> RawFace {
        RawFace {
            face_box: FaceBox { x, y, width: w, height: h },
            score,
            landmarks: [Point::new(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_iou() {
        let a = FaceBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let b = FaceBox { x: 5.0, y: 0.0, width: 10.0, height: 10.0 };
        let c = FaceBox { x: 50.0, y: 50.0, width: 10.0, height: 10.0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                raw(5.0, 5.0, 100.0, 100.0, 0.8),
                raw(200.0, 200.0, 50.0, 50.0, 0.7),
                raw(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            NMS_IOU,
        );
        let scores: Vec<f32> = kept.iter().map(|f| f.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let lb = Letterbox::fit(1280, 720);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        let p = lb.to_source(100.0 * 0.5, 50.0 * 0.5 + 140.0);
        assert!((p.x - 100.0).abs() < 1e-4);
        assert!((p.y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let img = RgbImage::from_pixel(320, 160, image::Rgb([255, 0, 128]));
        let (tensor, lb) = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding band is neutral.
        assert_eq!(tensor[[0, 0, 0, 320]], 0.0);
        let y = lb.pad_y as usize + 10;
        assert!((tensor[[0, 0, y, 320]] - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-3);
        assert!((tensor[[0, 1, y, 320]] - (0.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-3);
    }

    #[test]
    fn test_output_layout_named_and_positional() {
        let named: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let layout = OutputLayout::from_names(&named);
        assert_eq!(layout.score, [2, 5, 8]);
        assert_eq!(layout.bbox, [0, 3, 6]);
        assert_eq!(layout.kps, [1, 4, 7]);

        let numeric: Vec<String> = (400..409).map(|i: u32| i.to_string()).collect();
        let layout = OutputLayout::from_names(&numeric);
        assert_eq!(layout.score, [0, 1, 2]);
        assert_eq!(layout.kps, [6, 7, 8]);
    }

    #[test]
    fn test_decode_single_anchor() {
        // Stride 32 grid is 20×20 cells, two anchors each.
        let cells = 20 * 20 * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let mut bboxes = vec![0.0f32; cells * 4];
        let kps = vec![0.0f32; cells * 10];
        // Anchor 2 is the first anchor of cell (1, 0): centre x = 32.
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);
        let identity = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let faces = decode_stride(&scores, &bboxes, &kps, 32, &identity);
        assert_eq!(faces.len(), 1);
        let b = faces[0].face_box;
        assert_eq!((b.x, b.y, b.width, b.height), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(faces[0].landmarks[0], Point::new(32.0, 0.0));
    }

    #[test]
    fn test_clamp_box() {
        let mut b = FaceBox { x: -10.0, y: 5.0, width: 50.0, height: 500.0 };
        clamp_box(&mut b, 100.0, 100.0);
        assert_eq!((b.x, b.y, b.width, b.height), (0.0, 5.0, 40.0, 95.0));
    }
}
