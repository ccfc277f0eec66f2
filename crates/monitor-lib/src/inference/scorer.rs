//! Threshold-based inference dispatch

use super::{InferenceDispatch, ScoreModel};
use crate::error::{MonitorError, Result};
use crate::models::{ChannelBatch, InferenceResult, MonitorEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum time a single scoring call may take before it counts as failed
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scores batches and flags those at or above the machine's threshold
pub struct ThresholdScorer {
    model: Arc<dyn ScoreModel>,
    thresholds: HashMap<String, f64>,
    events: Option<broadcast::Sender<MonitorEvent>>,
    timeout: Duration,
}

impl ThresholdScorer {
    pub fn new(model: Arc<dyn ScoreModel>, thresholds: HashMap<String, f64>) -> Self {
        Self {
            model,
            thresholds,
            events: None,
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    /// Re-broadcast every result to monitoring subscribers
    pub fn with_events(mut self, events: broadcast::Sender<MonitorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn threshold(&self, machine_name: &str) -> Option<f64> {
        self.thresholds.get(machine_name).copied()
    }
}

#[async_trait]
impl InferenceDispatch for ThresholdScorer {
    async fn score(&self, batch: ChannelBatch, machine_name: &str) -> Result<InferenceResult> {
        let threshold = self.threshold(machine_name).ok_or_else(|| {
            MonitorError::InferenceFailure(format!("no threshold for {}", machine_name))
        })?;

        let model = self.model.clone();
        let task = tokio::task::spawn_blocking(move || model.score(&batch));

        let output = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => return Err(MonitorError::InferenceFailure(e.to_string())),
            Ok(Err(e)) => return Err(MonitorError::InferenceFailure(e.to_string())),
            Err(_) => {
                return Err(MonitorError::InferenceFailure(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        if !output.score.is_finite() {
            return Err(MonitorError::InferenceFailure(format!(
                "model returned non-finite score {}",
                output.score
            )));
        }

        let result = InferenceResult {
            anomaly: output.score >= threshold,
            name: machine_name.to_string(),
            score: output.score,
            threshold,
            remaining_time: output.remaining_time,
        };

        debug!(
            machine = %machine_name,
            score = result.score,
            threshold,
            anomaly = result.anomaly,
            model_version = %self.model.model_version(),
            "Batch scored"
        );

        if let Some(events) = &self.events {
            // No subscribers is not an error
            let _ = events.send(MonitorEvent::Model(result.clone()));
        }

        Ok(result)
    }
}
