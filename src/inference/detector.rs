use std::path::Path;

use opencv::core::Mat;

use super::pipeline::{check_joints, Detection, InferencePipeline};
use super::video::{encode_jpeg, VideoFileSource};
use crate::alert::FallAlert;
use crate::config::InferenceConfig;
use crate::error::Result;
use crate::model::FallClassifier;
use crate::pose::PoseExtractor;

/// Owns a loaded classifier and a pose extractor and runs one pipeline per
/// video file. The classifier is never mutated here.
pub struct VideoDetector<E> {
    classifier: FallClassifier,
    extractor: E,
    config: InferenceConfig,
}

impl<E: PoseExtractor<Mat>> VideoDetector<E> {
    pub fn new(classifier: FallClassifier, extractor: E, config: InferenceConfig) -> Result<Self> {
        check_joints(&classifier, extractor.num_joints())?;
        Ok(Self {
            classifier,
            extractor,
            config,
        })
    }

    pub fn classifier(&self) -> &FallClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn detect_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Detection<Mat>> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "running fall detection");
        let source = VideoFileSource::open(path);
        let mut pipeline =
            InferencePipeline::new(&self.classifier, &mut self.extractor, &self.config)?;
        pipeline.run(source)
    }
}

/// Packages a detection for a notifier, encoding the representative frame.
pub fn build_alert(source: &str, detection: &Detection<Mat>) -> FallAlert {
    let frame_jpeg = detection.representative.as_ref().and_then(|sample| {
        let jpeg = encode_jpeg(&sample.frame);
        if jpeg.is_none() {
            tracing::warn!(
                frame = sample.frame_number(),
                "representative frame could not be encoded"
            );
        }
        jpeg
    });
    FallAlert {
        source: source.to_string(),
        verdict: detection.verdict.clone(),
        frame_jpeg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FallError, PoseError};
    use crate::inference::Verdict;
    use crate::model::{JointAdjacency, ModelSpec};
    use crate::pose::PoseFrame;
    use tch::Device;

    struct NoPose(usize);

    impl PoseExtractor<Mat> for NoPose {
        fn extract(&mut self, _frame: &Mat) -> std::result::Result<Option<PoseFrame>, PoseError> {
            Ok(None)
        }

        fn num_joints(&self) -> usize {
            self.0
        }
    }

    fn classifier() -> FallClassifier {
        FallClassifier::new(
            ModelSpec {
                num_joints: 3,
                hidden_channels: 4,
                adjacency: JointAdjacency::Dense,
                ..ModelSpec::default()
            },
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_joint_mismatch_rejected() {
        let err = VideoDetector::new(classifier(), NoPose(4), InferenceConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, FallError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_unreadable_file_is_empty_input() {
        let mut detector =
            VideoDetector::new(classifier(), NoPose(3), InferenceConfig::default()).unwrap();
        let detection = detector.detect_file("/nonexistent/clip.mp4").unwrap();
        assert_eq!(detection.verdict, Verdict::empty());

        let alert = build_alert("/nonexistent/clip.mp4", &detection);
        assert!(alert.frame_jpeg.is_none());
        assert!(alert.verdict.is_empty_input());
    }
}
