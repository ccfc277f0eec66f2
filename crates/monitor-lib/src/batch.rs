//! Sliding batches for anomaly inference
//!
//! Each machine owns one [`AnomalyBatchProcessor`] holding three FIFO
//! sequences of resampled readings. Once every sequence holds at least
//! `batch_size` readings, the front `batch_size` of each is normalized and
//! scored, then removed in lock-step whatever the outcome. Readings beyond
//! the batch stay queued for the next trigger.
//!
//! Only one batch is evaluated per `add_*` call. When input arrives faster
//! than batches are consumed the queues keep growing; the backlog is
//! exported as the `pending_batch_samples` gauge.

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::inference::InferenceDispatch;
use crate::models::{AnomalyEvent, ChannelBatch, InferenceResult};
use crate::normalize::Normalizer;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::storage::AnomalyStore;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Per-machine batching and inference trigger
pub struct AnomalyBatchProcessor {
    machine: String,
    batch_size: usize,
    left: VecDeque<f64>,
    right: VecDeque<f64>,
    temp: VecDeque<f64>,
    normalizer: Arc<dyn Normalizer>,
    inference: Arc<dyn InferenceDispatch>,
    anomalies: Arc<dyn AnomalyStore>,
    clock: Arc<dyn Clock>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl AnomalyBatchProcessor {
    /// Create a processor; a `batch_size` of zero is treated as one
    pub fn new(
        machine: impl Into<String>,
        batch_size: usize,
        normalizer: Arc<dyn Normalizer>,
        inference: Arc<dyn InferenceDispatch>,
        anomalies: Arc<dyn AnomalyStore>,
    ) -> Self {
        Self {
            machine: machine.into(),
            batch_size: batch_size.max(1),
            left: VecDeque::new(),
            right: VecDeque::new(),
            temp: VecDeque::new(),
            normalizer,
            inference,
            anomalies,
            clock: Arc::new(SystemClock),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    /// Clock used to timestamp anomaly events
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Queue resampled left/right readings, then evaluate the trigger
    ///
    /// Returns the verdict when the call scored a batch.
    pub async fn add_vib(&mut self, left: &[f64], right: &[f64]) -> Result<Option<InferenceResult>> {
        self.left.extend(left);
        self.right.extend(right);
        self.trigger().await
    }

    /// Queue resampled temperature readings, then evaluate the trigger
    pub async fn add_temp(&mut self, data: &[f64]) -> Result<Option<InferenceResult>> {
        self.temp.extend(data);
        self.trigger().await
    }

    /// Queue lengths (left, right, temp)
    #[cfg(test)]
    pub fn pending_lens(&self) -> (usize, usize, usize) {
        (self.left.len(), self.right.len(), self.temp.len())
    }

    /// Snapshot of the queued readings, oldest first
    #[cfg(test)]
    pub fn pending(&self) -> ChannelBatch {
        ChannelBatch::new(
            self.left.iter().copied().collect(),
            self.right.iter().copied().collect(),
            self.temp.iter().copied().collect(),
        )
    }

    /// True iff every queue holds at least one full batch
    fn is_batch_ready(&self) -> bool {
        self.left.len() >= self.batch_size
            && self.right.len() >= self.batch_size
            && self.temp.len() >= self.batch_size
    }

    async fn trigger(&mut self) -> Result<Option<InferenceResult>> {
        if !self.is_batch_ready() {
            self.export_backlog();
            return Ok(None);
        }

        let n = self.batch_size;
        let batch = ChannelBatch::new(
            self.left.iter().take(n).copied().collect(),
            self.right.iter().take(n).copied().collect(),
            self.temp.iter().take(n).copied().collect(),
        );

        // At-most-once: the batch is consumed even if scoring fails
        let outcome = self.dispatch(batch).await;
        self.drain_batch();
        self.export_backlog();

        if let Err(e) = &outcome {
            self.logger
                .log_batch_dropped(&self.machine, self.batch_size, &e.to_string());
        }
        outcome.map(Some)
    }

    async fn dispatch(&self, batch: ChannelBatch) -> Result<InferenceResult> {
        let start = Instant::now();

        let normalized = self.normalizer.normalize(batch).await?;

        self.metrics.inc_inference_dispatches();
        let result = match self.inference.score(normalized, &self.machine).await {
            Ok(result) => result,
            Err(e) => {
                self.metrics.inc_inference_errors();
                return Err(e);
            }
        };
        self.metrics
            .observe_inference_latency(start.elapsed().as_secs_f64());

        debug!(
            machine = %self.machine,
            score = result.score,
            anomaly = result.anomaly,
            "Inference completed"
        );

        if result.anomaly {
            self.metrics.inc_anomalies_detected();
            self.logger
                .log_anomaly(&result.name, result.score, result.threshold);

            let event = AnomalyEvent {
                machine_name: result.name.clone(),
                score: result.score,
                threshold: result.threshold,
                timestamp: self.clock.now(),
            };
            if let Err(e) = self.anomalies.save_anomaly(event).await {
                self.metrics.inc_persistence_errors();
                return Err(e);
            }
        }

        Ok(result)
    }

    /// Remove exactly one batch from the front of every queue
    fn drain_batch(&mut self) {
        let n = self.batch_size;
        self.left.drain(..n.min(self.left.len()));
        self.right.drain(..n.min(self.right.len()));
        self.temp.drain(..n.min(self.temp.len()));
    }

    fn export_backlog(&self) {
        self.metrics
            .set_pending_samples(&self.machine, "left", self.left.len());
        self.metrics
            .set_pending_samples(&self.machine, "right", self.right.len());
        self.metrics
            .set_pending_samples(&self.machine, "temp", self.temp.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::normalize::IdentityNormalizer;
    use crate::storage::MemoryAnomalyStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Mock inference that records every call
    struct MockInference {
        calls: Mutex<Vec<(ChannelBatch, String)>>,
        fail: AtomicBool,
        score: f64,
        threshold: f64,
    }

    impl MockInference {
        fn new(score: f64, threshold: f64) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                score,
                threshold,
            }
        }

        fn calls(&self) -> Vec<(ChannelBatch, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InferenceDispatch for MockInference {
        async fn score(&self, batch: ChannelBatch, machine_name: &str) -> Result<InferenceResult> {
            self.calls
                .lock()
                .unwrap()
                .push((batch, machine_name.to_string()));

            if self.fail.load(Ordering::SeqCst) {
                return Err(MonitorError::InferenceFailure("model offline".to_string()));
            }

            Ok(InferenceResult {
                anomaly: self.score >= self.threshold,
                name: machine_name.to_string(),
                score: self.score,
                threshold: self.threshold,
                remaining_time: None,
            })
        }
    }

    /// Normalizer that doubles every reading
    struct DoublingNormalizer;

    #[async_trait]
    impl Normalizer for DoublingNormalizer {
        async fn normalize(&self, batch: ChannelBatch) -> Result<ChannelBatch> {
            let double = |v: Vec<f64>| v.into_iter().map(|x| x * 2.0).collect();
            Ok(ChannelBatch::new(
                double(batch.left),
                double(batch.right),
                double(batch.temp),
            ))
        }
    }

    fn processor(
        batch_size: usize,
        inference: Arc<MockInference>,
        store: Arc<MemoryAnomalyStore>,
    ) -> AnomalyBatchProcessor {
        AnomalyBatchProcessor::new(
            "machine1",
            batch_size,
            Arc::new(IdentityNormalizer),
            inference,
            store,
        )
    }

    #[tokio::test]
    async fn test_single_batch_dispatch() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let store = Arc::new(MemoryAnomalyStore::new());
        let mut proc = processor(2, inference.clone(), store.clone());

        proc.add_vib(&[1.0, 2.0], &[1.0, 2.0]).await.unwrap();
        assert!(inference.calls().is_empty());

        proc.add_temp(&[1.0, 2.0]).await.unwrap();

        let calls = inference.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            ChannelBatch::new(vec![1.0, 2.0], vec![1.0, 2.0], vec![1.0, 2.0])
        );
        assert_eq!(calls[0].1, "machine1");
        assert_eq!(proc.pending_lens(), (0, 0, 0));
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_trigger_until_all_channels_full() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let mut proc = processor(3, inference.clone(), Arc::new(MemoryAnomalyStore::new()));

        proc.add_vib(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0]).await.unwrap();
        proc.add_temp(&[1.0, 2.0]).await.unwrap();
        assert!(inference.calls().is_empty());
        assert_eq!(proc.pending_lens(), (4, 4, 2));

        proc.add_temp(&[3.0]).await.unwrap();
        assert_eq!(inference.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_surplus_does_not_fire_second_trigger() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let mut proc = processor(2, inference.clone(), Arc::new(MemoryAnomalyStore::new()));

        proc.add_temp(&[10.0, 20.0, 30.0, 40.0, 50.0]).await.unwrap();
        proc.add_vib(&[1.0, 2.0], &[5.0, 6.0]).await.unwrap();
        // A second full batch of temp exists but vib is now empty
        assert_eq!(inference.calls().len(), 1);

        proc.add_vib(&[3.0, 4.0, 5.0, 6.0, 7.0], &[7.0, 8.0, 9.0, 10.0, 11.0])
            .await
            .unwrap();

        // Both channels now hold >= 2x batch_size but only one dispatch happened
        let calls = inference.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0.left, vec![3.0, 4.0]);
        assert_eq!(calls[1].0.temp, vec![30.0, 40.0]);

        let pending = proc.pending();
        assert_eq!(pending.left, vec![5.0, 6.0, 7.0]);
        assert_eq!(pending.right, vec![9.0, 10.0, 11.0]);
        assert_eq!(pending.temp, vec![50.0]);
    }

    #[tokio::test]
    async fn test_double_batch_in_one_call_dispatches_once() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let mut proc = processor(2, inference.clone(), Arc::new(MemoryAnomalyStore::new()));

        proc.add_temp(&[1.0, 2.0, 3.0, 4.0]).await.unwrap();
        proc.add_vib(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0])
            .await
            .unwrap();

        assert_eq!(inference.calls().len(), 1);
        assert_eq!(proc.pending_lens(), (2, 2, 2));
        assert!(proc.is_batch_ready());
    }

    #[tokio::test]
    async fn test_inference_failure_still_drains() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        inference.fail.store(true, Ordering::SeqCst);
        let mut proc = processor(2, inference.clone(), Arc::new(MemoryAnomalyStore::new()));

        proc.add_vib(&[1.0, 2.0], &[1.0, 2.0]).await.unwrap();
        let result = proc.add_temp(&[1.0, 2.0]).await;

        assert!(matches!(result, Err(MonitorError::InferenceFailure(_))));
        assert_eq!(proc.pending_lens(), (0, 0, 0));

        // An identical batch gets a fresh, independent attempt
        inference.fail.store(false, Ordering::SeqCst);
        proc.add_vib(&[1.0, 2.0], &[1.0, 2.0]).await.unwrap();
        proc.add_temp(&[1.0, 2.0]).await.unwrap();

        let calls = inference.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, calls[1].0);
        assert_eq!(proc.pending_lens(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_anomaly_is_persisted() {
        let inference = Arc::new(MockInference::new(12.5, 10.0));
        let store = Arc::new(MemoryAnomalyStore::new());
        let mut proc = processor(1, inference, store.clone());

        proc.add_vib(&[1.0], &[1.0]).await.unwrap();
        proc.add_temp(&[1.0]).await.unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].machine_name, "machine1");
        assert_eq!(events[0].score, 12.5);
        assert_eq!(events[0].threshold, 10.0);
    }

    #[tokio::test]
    async fn test_normalizer_output_is_scored() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let mut proc = AnomalyBatchProcessor::new(
            "machine2",
            2,
            Arc::new(DoublingNormalizer),
            inference.clone(),
            Arc::new(MemoryAnomalyStore::new()),
        );

        proc.add_vib(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).await.unwrap();
        proc.add_temp(&[7.0, 8.0]).await.unwrap();

        let calls = inference.calls();
        assert_eq!(
            calls[0].0,
            ChannelBatch::new(vec![2.0, 4.0], vec![8.0, 10.0], vec![14.0, 16.0])
        );
        assert_eq!(calls[0].1, "machine2");
        // Raw surplus is kept, not the normalized values
        assert_eq!(proc.pending().left, vec![3.0]);
    }

    #[tokio::test]
    async fn test_queue_invariants_over_mixed_sequence() {
        let inference = Arc::new(MockInference::new(1.0, 10.0));
        let mut proc = processor(4, inference.clone(), Arc::new(MemoryAnomalyStore::new()));

        let mut next = 0.0;
        let mut total = 0usize;
        for step in 0..50usize {
            let before = proc.pending_lens();
            let calls_before = inference.calls().len();
            let len = (step * 7 + 3) % 6;
            let chunk: Vec<f64> = (0..len)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();

            if step % 3 == 0 {
                proc.add_temp(&chunk).await.unwrap();
            } else {
                proc.add_vib(&chunk, &chunk).await.unwrap();
            }
            total += len;

            let after_append = if step % 3 == 0 {
                (before.0, before.1, before.2 + len)
            } else {
                (before.0 + len, before.1 + len, before.2)
            };
            let fired = inference.calls().len() - calls_before;
            assert!(fired <= 1);

            if fired == 1 {
                assert!(after_append.0 >= 4 && after_append.1 >= 4 && after_append.2 >= 4);
                assert_eq!(
                    proc.pending_lens(),
                    (after_append.0 - 4, after_append.1 - 4, after_append.2 - 4)
                );
            } else {
                assert_eq!(proc.pending_lens(), after_append);
            }
        }

        // Every dispatched batch is a contiguous, ordered run of queued readings
        for (batch, _) in inference.calls() {
            assert!(batch.left.windows(2).all(|w| w[0] < w[1]));
            assert!(batch.temp.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(total > 0);
    }
}
