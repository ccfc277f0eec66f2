//! Scoring models
//!
//! [`OnnxScoreModel`] runs an exported anomaly model through tract;
//! [`FallbackScoreModel`] is a signal-energy heuristic used when no model
//! file is deployed.

use super::{ModelOutput, ScoreModel};
use crate::models::ChannelBatch;
use anyhow::{Context, Result};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Number of channels stacked into the model input
const NUM_CHANNELS: usize = 3;

/// Latency above which an inference is counted as slow
const MAX_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX anomaly model taking a `[1, 3, batch_len]` input
pub struct OnnxScoreModel {
    model: TractModel,
    batch_len: usize,
    version: String,
}

impl OnnxScoreModel {
    /// Load a model from bytes for batches of `batch_len` samples per channel
    pub fn new(model_bytes: &[u8], batch_len: usize, version: impl Into<String>) -> Result<Self> {
        let model = Self::load_model(model_bytes, batch_len)?;
        Ok(Self {
            model,
            batch_len,
            version: version.into(),
        })
    }

    /// Load a model from a file; the file name becomes the model version
    pub fn from_path(path: impl AsRef<std::path::Path>, batch_len: usize) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        let version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());
        Self::new(&bytes, batch_len, version)
    }

    fn load_model(model_bytes: &[u8], batch_len: usize) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_CHANNELS, batch_len]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    fn batch_to_tensor(&self, batch: &ChannelBatch) -> Result<Tensor> {
        for (name, channel) in [
            ("left", &batch.left),
            ("right", &batch.right),
            ("temp", &batch.temp),
        ] {
            if channel.len() != self.batch_len {
                anyhow::bail!(
                    "{} channel has {} samples, model expects {}",
                    name,
                    channel.len(),
                    self.batch_len
                );
            }
        }

        let data: Vec<f32> = batch
            .left
            .iter()
            .chain(&batch.right)
            .chain(&batch.temp)
            .map(|v| *v as f32)
            .collect();
        let array = tract_ndarray::Array3::from_shape_vec((1, NUM_CHANNELS, self.batch_len), data)?;
        Ok(array.into())
    }
}

impl ScoreModel for OnnxScoreModel {
    fn score(&self, batch: &ChannelBatch) -> Result<ModelOutput> {
        let start = Instant::now();
        let input = self.batch_to_tensor(batch)?;

        let outputs = self.model.run(tvec!(input.into()))?;
        let score = outputs
            .first()
            .context("No output from model")?
            .to_array_view::<f32>()?
            .iter()
            .next()
            .copied()
            .context("Empty score output")?;
        let remaining_time = match outputs.get(1) {
            Some(t) => t.to_array_view::<f32>()?.iter().next().map(|v| *v as f64),
            None => None,
        };

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        Ok(ModelOutput {
            score: score as f64,
            remaining_time,
        })
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

/// Heuristic model scoring a batch by the RMS energy of its channels
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackScoreModel;

impl ScoreModel for FallbackScoreModel {
    fn score(&self, batch: &ChannelBatch) -> Result<ModelOutput> {
        let values: Vec<f64> = batch
            .left
            .iter()
            .chain(&batch.right)
            .chain(&batch.temp)
            .copied()
            .collect();

        if values.is_empty() {
            anyhow::bail!("Cannot score an empty batch");
        }

        let mean_square = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
        Ok(ModelOutput {
            score: mean_square.sqrt(),
            remaining_time: None,
        })
    }

    fn model_version(&self) -> &str {
        "fallback"
    }
}
