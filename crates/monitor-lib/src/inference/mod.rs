//! Anomaly-scoring inference
//!
//! The pipeline only sees [`InferenceDispatch`]: hand it a normalized
//! batch and a machine name, get back a structured verdict. The default
//! dispatcher, [`ThresholdScorer`], wraps a [`ScoreModel`] and compares its
//! score with the machine's configured threshold.

mod model;
mod scorer;

pub use model::{FallbackScoreModel, OnnxScoreModel};
pub use scorer::{ThresholdScorer, DEFAULT_INFERENCE_TIMEOUT};

use crate::error::Result;
use crate::models::{ChannelBatch, InferenceResult};
use async_trait::async_trait;

/// Asynchronous scoring call made once per full batch
#[async_trait]
pub trait InferenceDispatch: Send + Sync {
    async fn score(&self, batch: ChannelBatch, machine_name: &str) -> Result<InferenceResult>;
}

/// Raw output of a scoring model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub score: f64,
    /// Estimated time to failure, if the model predicts one
    pub remaining_time: Option<f64>,
}

/// Trait for scoring model implementations
pub trait ScoreModel: Send + Sync {
    /// Score one normalized batch; higher means more anomalous
    fn score(&self, batch: &ChannelBatch) -> anyhow::Result<ModelOutput>;

    /// Identifier of the loaded model
    fn model_version(&self) -> &str;
}
