//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Input frames are
//! RGB; they are letterboxed into the top-left of a 640×640 canvas the way
//! InsightFace feeds the model.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect every face in `image`, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, scale) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                scale,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(all_detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detections after NMS");
        Ok(faces)
    }
}

/// Resize `image` to fit 640×640, place it top-left on a black canvas, and
/// normalize into a NCHW RGB tensor. Returns the tensor and the resize scale.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let scale = (SCRFD_INPUT_SIZE as f32 / width).min(SCRFD_INPUT_SIZE as f32 / height);
    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // canvas outside the resized image stays black, i.e. (0 - mean) / std
    let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE), pad);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

/// Map output tensors to strides by name ("score_8", "bbox_16", "kps_32", ...),
/// falling back to the standard positional layout:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps (strides 8, 16, 32).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let by_name = |stride: usize| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?));

    match (by_name(8), by_name(16), by_name(32)) {
        (Some(s8), Some(s16), Some(s32)) => [s8, s16, s32],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level into original image space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    scale: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let Some(d) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let x1 = (anchor_x - d[0] * step) / scale;
        let y1 = (anchor_y - d[1] * step) / scale;
        let x2 = (anchor_x + d[2] * step) / scale;
        let y2 = (anchor_y + d[3] * step) / scale;

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                (
                    (anchor_x + k[i * 2] * step) / scale,
                    (anchor_y + k[i * 2 + 1] * step) / scale,
                )
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression; output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_of_neighbours_in_a_class_row() {
        // two students side by side: boxes touch but do not overlap
        let left = make_bbox(100.0, 80.0, 60.0, 70.0, 0.9);
        let right = make_bbox(160.0, 82.0, 60.0, 70.0, 0.8);
        assert_eq!(iou(&left, &right), 0.0);

        // the same face found at two strides, slightly shifted
        let coarse = make_bbox(100.0, 80.0, 60.0, 70.0, 0.9);
        let fine = make_bbox(103.0, 80.0, 60.0, 70.0, 0.7);
        assert!(iou(&coarse, &fine) > SCRFD_NMS_THRESHOLD);
        assert!((iou(&coarse, &coarse) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_ignores_degenerate_boxes() {
        let face = make_bbox(10.0, 10.0, 40.0, 40.0, 0.9);
        let flat = make_bbox(10.0, 10.0, 0.0, 40.0, 0.6);
        let inverted = make_bbox(50.0, 50.0, -40.0, -40.0, 0.6);
        assert_eq!(iou(&face, &flat), 0.0);
        assert_eq!(iou(&flat, &flat), 0.0);
        assert_eq!(iou(&face, &inverted), 0.0);
    }

    #[test]
    fn test_nms_dedupes_one_face_per_student() {
        // each student is detected twice (adjacent anchors); keep the stronger
        let detections = vec![
            make_bbox(100.0, 80.0, 60.0, 70.0, 0.71),
            make_bbox(102.0, 81.0, 60.0, 70.0, 0.93),
            make_bbox(300.0, 90.0, 55.0, 65.0, 0.88),
            make_bbox(298.0, 88.0, 56.0, 66.0, 0.64),
            make_bbox(500.0, 85.0, 58.0, 68.0, 0.77),
        ];
        let kept = nms(detections, SCRFD_NMS_THRESHOLD);
        let xs: Vec<f32> = kept.iter().map(|d| d.x).collect();
        assert_eq!(xs, vec![102.0, 300.0, 500.0]);
    }

    #[test]
    fn test_nms_keeps_separate_faces_in_a_group_photo() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(400.0, 0.0, 60.0, 60.0, 0.95),
        ];
        let result = nms(detections, 0.4);
        let confidences: Vec<f32> = result.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_back_to_image_space() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let mut kps = vec![0.0f32; anchors * 10];

        // anchor in cell (col 2, row 1), second anchor of the cell
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        kps[idx * 10..idx * 10 + 2].copy_from_slice(&[0.5, -0.5]);

        let dets = decode_stride(&scores, &bboxes, &kps, stride, 2.0, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // anchor centre (64, 32) in model space, box ±32, halved by scale 2
        assert!((d.x - 16.0).abs() < 1e-4, "x = {}", d.x);
        assert!((d.y - 0.0).abs() < 1e-4, "y = {}", d.y);
        assert!((d.width - 32.0).abs() < 1e-4);
        assert!((d.height - 32.0).abs() < 1e-4);
        let lm = d.landmarks.unwrap();
        assert!((lm[0].0 - 40.0).abs() < 1e-4 && (lm[0].1 - 8.0).abs() < 1e-4, "{:?}", lm[0]);
    }

    #[test]
    fn test_decode_stride_below_threshold() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let scores = vec![0.5f32; anchors];
        let dets = decode_stride(&scores, &vec![0.0; anchors * 4], &vec![0.0; anchors * 10], stride, 1.0, 0.5);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_decode_stride_missing_kps_leaves_no_landmarks() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.99;
        let dets = decode_stride(&scores, &vec![0.0; anchors * 4], &[], stride, 1.0, 0.5);
        assert_eq!(dets.len(), 1);
        assert!(dets[0].landmarks.is_none());
    }

    #[test]
    fn test_preprocess_letterbox_top_left() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 128, 0]));
        let (tensor, scale) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        assert!((scale - 2.0).abs() < 1e-6);

        // image occupies rows 0..320, channels stay in RGB order
        let r = tensor[[0, 0, 10, 10]];
        let g = tensor[[0, 1, 10, 10]];
        let b = tensor[[0, 2, 10, 10]];
        assert!((r - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
        assert!((g - (128.0 - SCRFD_MEAN) / SCRFD_STD).abs() <= 1.0 / SCRFD_STD + 1e-5);
        assert!((b - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);

        // padding below is black
        let pad = tensor[[0, 0, 500, 10]];
        assert!((pad - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
    }

    #[test]
    fn test_discover_output_indices_by_name_in_any_order() {
        let names: Vec<String> = [
            "kps_32", "bbox_8", "score_16",
            "score_8", "kps_16", "bbox_32",
            "bbox_16", "score_32", "kps_8",
        ].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(3, 1, 8), (2, 6, 4), (7, 5, 0)]);
    }

    #[test]
    fn test_discover_output_indices_partial_names_use_positions() {
        // an export that only renamed some outputs cannot be trusted by name
        let mut names: Vec<String> = (0..9).map(|i: usize| format!("out{i}")).collect();
        names[0] = "score_8".into();
        names[3] = "bbox_8".into();
        names[6] = "kps_8".into();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_group_photo_letterbox_keeps_aspect() {
        // wide classroom shot: width bounds the scale, rows below the image are padding
        let image = RgbImage::from_pixel(1280, 480, Rgb([40, 200, 90]));
        let (tensor, scale) = preprocess(&image);
        assert!((scale - 0.5).abs() < 1e-6);
        let norm = |v: u8| (v as f32 - SCRFD_MEAN) / SCRFD_STD;
        // resampling may land one level off on interior pixels
        assert!((tensor[[0, 1, 239, 639]] - norm(200)).abs() <= 1.0 / SCRFD_STD + 1e-5);
        assert!((tensor[[0, 1, 240, 0]] - norm(0)).abs() < 1e-5);
        assert!((tensor[[0, 2, 639, 639]] - norm(0)).abs() < 1e-5);
    }
}
