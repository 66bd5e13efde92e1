//! End-to-end runs over synthetic frame sources and datasets.

use fallwatch::config::{InferenceConfig, TrainingConfig};
use fallwatch::error::PoseError;
use fallwatch::inference::{FrameSampler, IterSource, InferencePipeline};
use fallwatch::model::{FallClassifier, JointAdjacency, ModelSpec};
use fallwatch::pose::{Joint, PoseExtractor, PoseFrame};
use fallwatch::training::{FallDataset, Trainer};
use fallwatch::FallError;
use ndarray::Array4;
use tch::Device;

const JOINTS: usize = 5;

/// A frame is the pose value itself; `None` means no person in view.
struct ValuePose;

impl PoseExtractor<Option<f32>> for ValuePose {
    fn extract(&mut self, frame: &Option<f32>) -> Result<Option<PoseFrame>, PoseError> {
        match frame {
            Some(v) => {
                let joints = (0..JOINTS)
                    .map(|j| Joint::new(*v, *v + j as f32 * 0.1, 0.0, 1.0))
                    .collect();
                PoseFrame::new(joints, JOINTS).map(Some)
            }
            None => Ok(None),
        }
    }

    fn num_joints(&self) -> usize {
        JOINTS
    }
}

fn spec() -> ModelSpec {
    ModelSpec {
        num_joints: JOINTS,
        num_classes: 2,
        hidden_channels: 8,
        temporal_kernel: 3,
        adjacency: JointAdjacency::Dense,
    }
}

fn classifier(seed: i64) -> FallClassifier {
    tch::manual_seed(seed);
    FallClassifier::new(spec(), Device::Cpu).unwrap()
}

fn inference(frame_skip: usize) -> InferenceConfig {
    InferenceConfig {
        frame_skip,
        ..InferenceConfig::default()
    }
}

#[test]
fn test_identical_frames_share_one_label() {
    let model = classifier(3);
    let mut pipeline = InferencePipeline::new(&model, ValuePose, &inference(50)).unwrap();
    let frames = std::iter::repeat(Some(0.4)).take(150);
    let detection = pipeline.run(IterSource(frames)).unwrap();

    let segments = detection.verdict.segments();
    let keys: Vec<u64> = segments.keys().copied().collect();
    assert_eq!(keys, vec![1, 51, 101]);

    let first = segments[&1];
    assert!(segments.values().all(|label| *label == first));
    assert_eq!(detection.verdict.fall_detected(), first.is_fallen());
}

#[test]
fn test_verdict_is_deterministic() {
    let model = classifier(21);
    let frames: Vec<Option<f32>> = (0..40).map(|i| Some((i % 7) as f32 / 7.0)).collect();

    let mut verdicts = Vec::new();
    for _ in 0..2 {
        let mut pipeline = InferencePipeline::new(&model, ValuePose, &inference(3)).unwrap();
        let detection = pipeline.run(IterSource(frames.clone().into_iter())).unwrap();
        verdicts.push(serde_json::to_value(&detection.verdict).unwrap());
    }
    assert_eq!(verdicts[0], verdicts[1]);
}

#[test]
fn test_no_person_still_classified() {
    let model = classifier(5);
    let mut pipeline = InferencePipeline::new(&model, ValuePose, &inference(4)).unwrap();
    let frames = std::iter::repeat(None).take(10);
    let detection = pipeline.run(IterSource(frames)).unwrap();

    assert!(!detection.verdict.is_empty_input());
    assert_eq!(detection.verdict.segments().len(), 3);
    assert_eq!(detection.missing_poses, 3);
}

#[test]
fn test_empty_source_is_flagged() {
    let model = classifier(5);
    let mut pipeline = InferencePipeline::new(&model, ValuePose, &inference(50)).unwrap();
    let detection = pipeline
        .run(IterSource(std::iter::empty::<Option<f32>>()))
        .unwrap();

    assert!(detection.verdict.is_empty_input());
    assert!(detection.verdict.segments().is_empty());
    assert!(matches!(
        detection.verdict.non_empty(),
        Err(FallError::EmptyInput)
    ));
}

#[test]
fn test_sampler_retains_ceiling_of_frames_over_skip() {
    for (frames, skip) in [(150usize, 50usize), (151, 50), (1, 50), (49, 7), (10, 1)] {
        let sampler = FrameSampler::new(IterSource(0..frames), skip);
        let kept: Vec<usize> = sampler.map(|s| s.unwrap().frame).collect();
        assert_eq!(kept.len(), frames.div_ceil(skip), "{frames} frames, skip {skip}");
        assert!(kept.iter().all(|i| i % skip == 0));
    }
}

#[test]
fn test_train_then_detect_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("models").join("fall.safetensors");

    // Class 1 sequences sit near the bottom of the frame, class 0 near the top.
    let n = 16;
    let frames = 6;
    let mut sequences = Array4::<f32>::zeros((n, frames, JOINTS, 4));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let label = (i % 2) as i64;
        let y = if label == 1 { 0.9 } else { 0.1 };
        for t in 0..frames {
            for j in 0..JOINTS {
                sequences[[i, t, j, 0]] = 0.5;
                sequences[[i, t, j, 1]] = y;
                sequences[[i, t, j, 3]] = 1.0;
            }
        }
        labels.push(label);
    }
    let dataset = FallDataset::new(sequences, labels).unwrap();
    let (train, val) = dataset.split(0.25, 7);

    let config = TrainingConfig {
        batch_size: 4,
        epochs: 2,
        checkpoint: checkpoint.clone(),
        ..TrainingConfig::default()
    };
    let mut trainer = Trainer::new(classifier(1), config, train, val).unwrap();
    let reports = trainer.fit().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.train_loss.is_finite()));
    assert!(checkpoint.exists());

    let trained = trainer.into_classifier();
    let restored = FallClassifier::from_checkpoint(&checkpoint, Device::Cpu).unwrap();
    assert_eq!(restored.spec(), trained.spec());

    let frames: Vec<Option<f32>> = (0..20).map(|i| Some(i as f32 / 20.0)).collect();
    let run = |model: &FallClassifier| {
        let mut pipeline = InferencePipeline::new(model, ValuePose, &inference(2)).unwrap();
        let detection = pipeline.run(IterSource(frames.clone().into_iter())).unwrap();
        serde_json::to_value(&detection.verdict).unwrap()
    };
    assert_eq!(run(&trained), run(&restored));
}
