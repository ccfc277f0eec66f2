//! Batch normalization before inference
//!
//! The scoring model was trained on min/max scaled channels; the scaling
//! table is produced offline and loaded at start-up.

use crate::error::{MonitorError, Result};
use crate::models::ChannelBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transform applied to a batch before it is scored
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, batch: ChannelBatch) -> Result<ChannelBatch>;
}

/// Passes batches through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

#[async_trait]
impl Normalizer for IdentityNormalizer {
    async fn normalize(&self, batch: ChannelBatch) -> Result<ChannelBatch> {
        Ok(batch)
    }
}

/// Observed range of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub min: f64,
    pub max: f64,
}

impl ChannelRange {
    fn scale(&self, values: Vec<f64>) -> Vec<f64> {
        let span = self.max - self.min;
        if span.abs() < f64::EPSILON {
            return vec![0.0; values.len()];
        }
        values.into_iter().map(|v| (v - self.min) / span).collect()
    }
}

/// Per-channel min/max scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxNormalizer {
    pub left: ChannelRange,
    pub right: ChannelRange,
    pub temp: ChannelRange,
}

impl MinMaxNormalizer {
    pub fn new(left: ChannelRange, right: ChannelRange, temp: ChannelRange) -> Self {
        Self { left, right, temp }
    }

    /// Load the scaling table from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Normalization(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            MonitorError::Normalization(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl Normalizer for MinMaxNormalizer {
    async fn normalize(&self, batch: ChannelBatch) -> Result<ChannelBatch> {
        Ok(ChannelBatch {
            left: self.left.scale(batch.left),
            right: self.right.scale(batch.right),
            temp: self.temp.scale(batch.temp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_identity_passthrough() {
        let batch = ChannelBatch::new(vec![1.0], vec![2.0], vec![3.0]);
        let out = IdentityNormalizer.normalize(batch.clone()).await.unwrap();
        assert_eq!(out, batch);
    }

    #[tokio::test]
    async fn test_min_max_scaling() {
        let norm = MinMaxNormalizer::new(
            ChannelRange { min: 0.0, max: 10.0 },
            ChannelRange { min: -1.0, max: 1.0 },
            ChannelRange { min: 20.0, max: 20.0 },
        );
        let out = norm
            .normalize(ChannelBatch::new(
                vec![0.0, 5.0, 10.0],
                vec![-1.0, 0.0, 1.0],
                vec![20.0, 25.0, 30.0],
            ))
            .await
            .unwrap();

        assert_eq!(out.left, vec![0.0, 0.5, 1.0]);
        assert_eq!(out.right, vec![0.0, 0.5, 1.0]);
        // Degenerate range collapses to zero
        assert_eq!(out.temp, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("norm.json");
        std::fs::write(
            &path,
            r#"{"left": {"min": 0, "max": 2}, "right": {"min": 0, "max": 4}, "temp": {"min": 10, "max": 60}}"#,
        )
        .unwrap();

        let norm = MinMaxNormalizer::load(&path).unwrap();
        assert_eq!(norm.right, ChannelRange { min: 0.0, max: 4.0 });
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = MinMaxNormalizer::load("/nonexistent/norm.json");
        assert!(matches!(result, Err(MonitorError::Normalization(_))));
    }
}
