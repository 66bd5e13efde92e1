use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::{JointAdjacency, ModelSpec};

pub const DEFAULT_CONFIG_PATH: &str = "fallwatch.toml";

fn default_num_joints() -> usize {
    crate::pose::DEFAULT_NUM_JOINTS
}

fn default_num_classes() -> usize {
    2
}

fn default_hidden_channels() -> usize {
    64
}

fn default_temporal_kernel() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_num_joints")]
    pub num_joints: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_hidden_channels")]
    pub hidden_channels: usize,
    #[serde(default = "default_temporal_kernel")]
    pub temporal_kernel: usize,
    /// Skeleton edges for the graph-aware spatial step. Empty means dense.
    #[serde(default)]
    pub edges: Vec<[usize; 2]>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_joints: default_num_joints(),
            num_classes: default_num_classes(),
            hidden_channels: default_hidden_channels(),
            temporal_kernel: default_temporal_kernel(),
            edges: Vec::new(),
        }
    }
}

impl ModelConfig {
    pub fn spec(&self) -> ModelSpec {
        let adjacency = if self.edges.is_empty() {
            JointAdjacency::Dense
        } else {
            JointAdjacency::Graph(self.edges.clone())
        };
        ModelSpec {
            num_joints: self.num_joints,
            num_classes: self.num_classes,
            hidden_channels: self.hidden_channels,
            temporal_kernel: self.temporal_kernel,
            adjacency,
        }
    }
}

fn default_batch_size() -> usize {
    16
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_epochs() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}

fn default_val_fraction() -> f64 {
    0.2
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from("fall_stgcn.safetensors")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            epochs: default_epochs(),
            seed: default_seed(),
            val_fraction: default_val_fraction(),
            checkpoint: default_checkpoint(),
        }
    }
}

fn default_frame_skip() -> usize {
    50
}

fn default_window_size() -> usize {
    8
}

fn default_joint_channels() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_frame_skip")]
    pub frame_skip: usize,
    /// Retained frames per classification window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_joint_channels")]
    pub joint_channels: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            frame_skip: default_frame_skip(),
            window_size: default_window_size(),
            joint_channels: default_joint_channels(),
        }
    }
}

fn default_pose_model() -> String {
    "yolo11n-pose.onnx".to_string()
}

fn default_pose_confidence() -> f32 {
    0.5
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_pose_model")]
    pub model: String,
    #[serde(default = "default_pose_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model: default_pose_model(),
            confidence_threshold: default_pose_confidence(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub notify_on_negative: bool,
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub cuda: bool,
}

impl DeviceConfig {
    pub fn device(&self) -> tch::Device {
        if self.cuda {
            tch::Device::cuda_if_available()
        } else {
            tch::Device::Cpu
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Load `fallwatch.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)
        } else {
            tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG_PATH);
            Ok(Self::default())
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.spec().validate()?;

        let training = &self.training;
        if training.batch_size == 0 {
            return Err(ConfigError::invalid_value("training.batch_size", "must be > 0"));
        }
        if training.learning_rate <= 0.0 {
            return Err(ConfigError::invalid_value(
                "training.learning_rate",
                "must be > 0.0",
            ));
        }
        if training.epochs == 0 {
            return Err(ConfigError::invalid_value("training.epochs", "must be > 0"));
        }
        if !(0.0..1.0).contains(&training.val_fraction) {
            return Err(ConfigError::invalid_value(
                "training.val_fraction",
                "must be in [0.0, 1.0)",
            ));
        }

        let inference = &self.inference;
        if inference.frame_skip == 0 {
            return Err(ConfigError::invalid_value("inference.frame_skip", "must be > 0"));
        }
        if inference.window_size == 0 {
            return Err(ConfigError::invalid_value(
                "inference.window_size",
                "must be > 0",
            ));
        }
        if !(2..=4).contains(&inference.joint_channels) {
            return Err(ConfigError::invalid_value(
                "inference.joint_channels",
                "must be 2, 3 or 4",
            ));
        }

        if !(0.0..=1.0).contains(&self.pose.confidence_threshold) {
            return Err(ConfigError::invalid_value(
                "pose.confidence_threshold",
                "must be in [0.0, 1.0]",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.model.num_joints, 17);
        assert_eq!(config.model.num_classes, 2);
        assert_eq!(config.model.hidden_channels, 64);
        assert_eq!(config.training.batch_size, 16);
        assert!((config.training.learning_rate - 0.001).abs() < 1e-12);
        assert_eq!(config.training.epochs, 10);
        assert_eq!(config.inference.frame_skip, 50);
        assert_eq!(config.inference.joint_channels, 4);
        assert_eq!(config.http.port, 8080);
        assert!(config.alert.webhook_url.is_none());
        assert_eq!(config.model.spec().adjacency, JointAdjacency::Dense);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [inference]
            frame_skip = 10

            [model]
            num_joints = 17
            edges = [[0, 1], [1, 2]]
            "#,
        )
        .unwrap();
        assert_eq!(config.inference.frame_skip, 10);
        assert_eq!(config.inference.window_size, 8);
        assert_eq!(config.model.num_joints, 17);
        assert_eq!(
            config.model.spec().adjacency,
            JointAdjacency::Graph(vec![[0, 1], [1, 2]])
        );
    }

    #[test]
    fn test_zero_frame_skip_rejected() {
        let err = Config::parse("[inference]\nframe_skip = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "inference.frame_skip",
                ..
            }
        ));
    }

    #[test]
    fn test_edge_outside_skeleton_rejected() {
        let err = Config::parse("[model]\nnum_joints = 5\nedges = [[0, 5]]\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "model.edges",
                ..
            }
        ));
    }

    #[test]
    fn test_model_section_checked_like_spec() {
        let toml = "[model]\nhidden_channels = 0\n";
        let err = Config::parse(toml).unwrap_err();
        let config: Config = toml::from_str(toml).unwrap();
        let spec_err = config.model.spec().validate().unwrap_err();
        assert_eq!(err.to_string(), spec_err.to_string());
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "model.hidden_channels",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            Config::parse("[training\nepochs = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
