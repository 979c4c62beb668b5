use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error(
        "minibatch size {minibatch_size} is not divisible by minibatch_gpu {minibatch_gpu} x {num_replicas} replicas"
    )]
    MinibatchDivisibility { minibatch_size: usize, minibatch_gpu: usize, num_replicas: usize },

    #[error("resume checkpoint not found: {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("loss error: {0}")]
    Loss(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error("metric error: {0}")]
    Metric(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
