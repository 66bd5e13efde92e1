use ndarray::{Array4, ArrayD, ArrayView2, ArrayViewD, Axis, Ix3};
use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use super::extractor::PoseExtractor;
use super::joint::{Joint, PoseFrame};
use crate::error::PoseError;

const POSE_INPUT_SIZE: u32 = 640;
const POSE_OUTPUT_NAME: &str = "output0";
const PAD_VALUE: f64 = 114.0;
/// Pose heads score a single class, "person".
const POSE_CLASSES: usize = 1;

fn runtime(e: impl std::fmt::Display) -> PoseError {
    PoseError::Runtime(e.to_string())
}

/// Mapping from model input pixels back to the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: f32,
    pub orig_h: f32,
}

impl Letterbox {
    fn new(orig_w: f32, orig_h: f32) -> Self {
        let input_size = POSE_INPUT_SIZE as f32;
        let scale = (input_size / orig_w).min(input_size / orig_h);
        let new_w = (orig_w * scale).round();
        let new_h = (orig_h * scale).round();
        Self {
            scale,
            pad_x: ((input_size - new_w) / 2.0).floor(),
            pad_y: ((input_size - new_h) / 2.0).floor(),
            orig_w,
            orig_h,
        }
    }

    /// Model-space point to normalised `[0, 1]` image coordinates.
    fn normalise(&self, x: f32, y: f32) -> (f32, f32) {
        let ox = (x - self.pad_x) / self.scale;
        let oy = (y - self.pad_y) / self.scale;
        (
            (ox / self.orig_w).clamp(0.0, 1.0),
            (oy / self.orig_h).clamp(0.0, 1.0),
        )
    }
}

/// YOLO-pose style ONNX model: output `[1, 5 + 3K, anchors]` (box, person
/// score, then `(x, y, confidence)` per keypoint).
///
/// Construction runs one blank frame through the model and fails unless the
/// head emits exactly `num_joints` keypoints.
pub struct OnnxPoseExtractor {
    session: Session,
    confidence_threshold: f32,
    num_joints: usize,
}

impl OnnxPoseExtractor {
    pub fn new(
        model_path: &str,
        confidence_threshold: f32,
        intra_threads: usize,
        num_joints: usize,
    ) -> Result<Self, PoseError> {
        let builder = Session::builder()
            .map_err(runtime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime)?
            .with_intra_threads(intra_threads)
            .map_err(runtime)?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path).map_err(runtime)?
        } else {
            builder.commit_from_file(model_path).map_err(runtime)?
        };

        let mut extractor = Self {
            session,
            confidence_threshold,
            num_joints,
        };
        let side = POSE_INPUT_SIZE as usize;
        let blank = extractor.infer(&Array4::zeros((1, 3, side, side)))?;
        features_first(blank.shape(), num_joints)?;

        tracing::info!(
            model = %model_path,
            joints = num_joints,
            output = ?blank.shape(),
            "pose model loaded"
        );
        Ok(extractor)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>, PoseError> {
        let input_ref = TensorRef::from_array_view(input.view())
            .map_err(runtime)?
            .into_dyn();
        let outputs = self
            .session
            .run(ort::inputs![input_ref])
            .map_err(runtime)?;

        let Some(raw) = outputs.get(POSE_OUTPUT_NAME) else {
            return Err(PoseError::Output(format!(
                "model has no `{POSE_OUTPUT_NAME}` output"
            )));
        };
        let output = raw.try_extract_array::<f32>().map_err(runtime)?.to_owned();
        Ok(output)
    }

    fn preprocess(&self, frame: &Mat) -> Result<(Array4<f32>, Letterbox), PoseError> {
        let letterbox = Letterbox::new(frame.cols() as f32, frame.rows() as f32);
        let input_size = POSE_INPUT_SIZE as i32;
        let new_w = (letterbox.orig_w * letterbox.scale).round() as i32;
        let new_h = (letterbox.orig_h * letterbox.scale).round() as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = letterbox.pad_x as i32;
        let pad_y = letterbox.pad_y as i32;
        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            input_size - new_h - pad_y,
            pad_x,
            input_size - new_w - pad_x,
            BORDER_CONSTANT,
            Scalar::new(PAD_VALUE, PAD_VALUE, PAD_VALUE, 0.0),
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&padded, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let side = POSE_INPUT_SIZE as usize;
        let data = rgb.data_bytes()?;
        if data.len() < side * side * 3 {
            return Err(PoseError::Output(format!(
                "letterboxed frame has {} bytes, expected {}",
                data.len(),
                side * side * 3
            )));
        }

        let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            data[(y * side + x) * 3 + c] as f32 / 255.0
        });
        Ok((tensor, letterbox))
    }
}

impl PoseExtractor<Mat> for OnnxPoseExtractor {
    fn extract(&mut self, frame: &Mat) -> Result<Option<PoseFrame>, PoseError> {
        if frame.rows() == 0 || frame.cols() == 0 {
            return Ok(None);
        }

        let (input, letterbox) = self.preprocess(frame)?;
        let output = self.infer(&input)?;
        decode_best_pose(
            &output.view(),
            self.num_joints,
            self.confidence_threshold,
            &letterbox,
        )
    }

    fn num_joints(&self) -> usize {
        self.num_joints
    }
}

/// Rows in the feature axis of a pose head with `num_joints` keypoints.
fn pose_features(num_joints: usize) -> usize {
    4 + POSE_CLASSES + 3 * num_joints
}

/// Whether a `[1, a, b]` output stores features along `a`.
///
/// One of the two axes must hold exactly [`pose_features`] rows; anything
/// else is a model built for another skeleton and is rejected.
fn features_first(shape: &[usize], num_joints: usize) -> Result<bool, PoseError> {
    let &[_, a, b] = shape else {
        return Err(PoseError::Output(format!(
            "expected a 3-D `[1, features, anchors]` output, got {shape:?}"
        )));
    };
    let expected = pose_features(num_joints);
    if a == expected {
        return Ok(true);
    }
    if b == expected {
        return Ok(false);
    }

    match a.min(b).checked_sub(4 + POSE_CLASSES) {
        Some(keypoint_rows) if keypoint_rows % 3 == 0 => Err(PoseError::KeypointCount {
            expected: num_joints,
            actual: keypoint_rows / 3,
        }),
        _ => Err(PoseError::Output(format!(
            "output {shape:?} has no axis of {expected} features for {num_joints} keypoints"
        ))),
    }
}

/// Picks the highest-scoring person above `threshold` from a raw
/// `[1, features, anchors]` (or transposed) output.
pub fn decode_best_pose(
    output: &ArrayViewD<f32>,
    num_joints: usize,
    threshold: f32,
    letterbox: &Letterbox,
) -> Result<Option<PoseFrame>, PoseError> {
    let output = output
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| PoseError::Output(format!("expected 3-D output, got {:?}", output.shape())))?;
    let batch = output.index_axis(Axis(0), 0);

    let rows = if features_first(output.shape(), num_joints)? {
        batch
    } else {
        batch.reversed_axes()
    };
    decode_rows(rows, num_joints, threshold, letterbox)
}

fn decode_rows(
    rows: ArrayView2<f32>,
    num_joints: usize,
    threshold: f32,
    letterbox: &Letterbox,
) -> Result<Option<PoseFrame>, PoseError> {
    let anchors = rows.ncols();

    let mut best: Option<(usize, f32)> = None;
    for anchor in 0..anchors {
        let score = rows[[4, anchor]];
        if score.is_nan() || score < threshold {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((anchor, score));
        }
    }

    let Some((anchor, score)) = best else {
        return Ok(None);
    };
    tracing::trace!(anchor, score, "person selected");

    let kpt_start = 4 + POSE_CLASSES;
    let joints = (0..num_joints)
        .map(|k| {
            let offset = kpt_start + k * 3;
            let (x, y) = letterbox.normalise(rows[[offset, anchor]], rows[[offset + 1, anchor]]);
            Joint::new(x, y, 0.0, rows[[offset + 2, anchor]])
        })
        .collect();

    PoseFrame::new(joints, num_joints).map(Some)
}
