use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::config::InferenceConfig;
use crate::error::{ConfigError, FallError, Result};
use crate::model::FallClassifier;
use crate::pose::{ChannelLayout, PoseExtractor, PoseSequenceBuilder};

use super::sampler::{FrameSampler, SampledFrame};
use super::verdict::{FallLabel, Verdict};
use super::video::FrameSource;

/// Lifecycle of one run. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Opened,
    Sampling,
    Extracting,
    Tensorizing,
    Classifying,
    Aggregating,
    Closed,
}

/// Verdict plus the frame a notifier should attach.
#[derive(Debug)]
pub struct Detection<F> {
    pub verdict: Verdict,
    /// Earliest retained frame labelled fallen.
    pub representative: Option<SampledFrame<F>>,
    /// Retained frames where no pose was found and zeros were used.
    pub missing_poses: usize,
}

impl<F> Detection<F> {
    fn empty() -> Self {
        Self {
            verdict: Verdict::empty(),
            representative: None,
            missing_poses: 0,
        }
    }
}

/// The extractor must emit exactly the joint count the network expects.
pub(crate) fn check_joints(classifier: &FallClassifier, extractor_joints: usize) -> Result<()> {
    let expected = classifier.spec().num_joints;
    if extractor_joints != expected {
        return Err(FallError::shape_mismatch(
            "pose extractor joints",
            vec![expected as i64],
            vec![extractor_joints as i64],
        ));
    }
    Ok(())
}

/// Video → sampled frames → poses → windowed classification → verdict.
///
/// Each retained frame `i` is labelled by one forward pass over the
/// trailing window of retained frames `[max(0, i + 1 - W), i + 1)`.
pub struct InferencePipeline<'m, F, E> {
    classifier: &'m FallClassifier,
    extractor: E,
    frame_skip: usize,
    window_size: usize,
    layout: ChannelLayout,
    stage: Stage,
    _frame: PhantomData<fn(&F)>,
}

impl<'m, F, E: PoseExtractor<F>> InferencePipeline<'m, F, E> {
    /// Fails when the extractor and the network disagree on joint count.
    pub fn new(classifier: &'m FallClassifier, extractor: E, config: &InferenceConfig) -> Result<Self> {
        check_joints(classifier, extractor.num_joints())?;
        let layout = ChannelLayout::from_channels(config.joint_channels).ok_or_else(|| {
            ConfigError::invalid_value("inference.joint_channels", "must be 2, 3 or 4")
        })?;

        Ok(Self {
            classifier,
            extractor,
            frame_skip: config.frame_skip.max(1),
            window_size: config.window_size.max(1),
            layout,
            stage: Stage::Closed,
            _frame: PhantomData,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "pipeline stage");
        self.stage = stage;
    }

    /// Runs the whole source to completion.
    pub fn run<S: FrameSource<Frame = F>>(&mut self, source: S) -> Result<Detection<F>> {
        self.enter(Stage::Opened);
        let result = self.run_stages(source);
        self.enter(Stage::Closed);
        result
    }

    fn run_stages<S: FrameSource<Frame = F>>(&mut self, source: S) -> Result<Detection<F>> {
        let num_joints = self.classifier.spec().num_joints;
        let mut builder = PoseSequenceBuilder::new(num_joints, self.layout);
        let mut retained = Vec::new();
        let mut sampler = FrameSampler::new(source, self.frame_skip);

        self.enter(Stage::Sampling);
        while let Some(sample) = sampler.next_sample()? {
            self.enter(Stage::Extracting);
            let pose = self.extractor.extract(&sample.frame)?;
            builder.push(pose)?;
            retained.push(sample);
            self.enter(Stage::Sampling);
        }

        if retained.is_empty() {
            tracing::warn!(frames = sampler.frames_seen(), "no frames sampled");
            return Ok(Detection::empty());
        }
        let missing_poses = builder.missing();
        tracing::debug!(
            frames = sampler.frames_seen(),
            retained = retained.len(),
            missing_poses,
            "sampling done"
        );

        self.enter(Stage::Tensorizing);
        let sequence = builder.build();
        tracing::debug!(
            frames = sequence.frames(),
            joints = sequence.num_joints(),
            channels = sequence.channels(),
            "pose sequence built"
        );
        let input = sequence.to_tensor(self.classifier.device())?;

        self.enter(Stage::Classifying);
        let mut labels = Vec::with_capacity(retained.len());
        for i in 0..retained.len() {
            let start = (i + 1).saturating_sub(self.window_size);
            let window = input.narrow(2, start as i64, (i + 1 - start) as i64);
            let class = self
                .classifier
                .predict(&window)?
                .first()
                .copied()
                .unwrap_or_default();
            labels.push(FallLabel::from_class(class));
        }

        self.enter(Stage::Aggregating);
        let segments: BTreeMap<u64, FallLabel> = retained
            .iter()
            .zip(&labels)
            .map(|(sample, &label)| (sample.frame_number(), label))
            .collect();
        let verdict = Verdict::from_segments(segments);
        let representative = labels
            .iter()
            .position(|label| label.is_fallen())
            .map(|i| retained.swap_remove(i));

        tracing::info!(
            retained = labels.len(),
            fall_detected = verdict.fall_detected(),
            first_fall = ?verdict.first_fall(),
            "video classified"
        );

        Ok(Detection {
            verdict,
            representative,
            missing_poses,
        })
    }
}
