//! Fan-out of raw sensor messages to the per-machine pipelines
//!
//! Raw readings go to the machine's [`RollupAccumulator`] untouched; each
//! channel is separately resampled to `sampling_rate` points before it
//! reaches the machine's [`AnomalyBatchProcessor`]. Machines are handled
//! one after the other, machine 1 first, and the whole call completes
//! before the next message is looked at.

use crate::batch::AnomalyBatchProcessor;
use crate::error::{MonitorError, Result};
use crate::models::{InferenceResult, MachineId, TempMessage, VibMessage};
use crate::resample::Resampler;
use crate::rollup::RollupAccumulator;
use std::sync::Arc;
use tracing::warn;

/// Downstream stages a message reached without failing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageActivity {
    /// A batch was scored
    pub inference: bool,
    /// A rollup or anomaly row was written
    pub storage: bool,
}

impl StageActivity {
    fn merge(self, other: StageActivity) -> Self {
        Self {
            inference: self.inference || other.inference,
            storage: self.storage || other.storage,
        }
    }
}

/// Components exclusively owned by one machine
pub struct MachineSlot {
    pub rollup: RollupAccumulator,
    pub batch: AnomalyBatchProcessor,
}

impl MachineSlot {
    pub fn new(rollup: RollupAccumulator, batch: AnomalyBatchProcessor) -> Self {
        Self { rollup, batch }
    }
}

/// Top-level entry point of the ingestion pipeline
pub struct IngestionDispatcher {
    machine1: MachineSlot,
    machine2: MachineSlot,
    resampler: Arc<dyn Resampler>,
    sampling_rate: usize,
}

impl IngestionDispatcher {
    pub fn new(
        machine1: MachineSlot,
        machine2: MachineSlot,
        resampler: Arc<dyn Resampler>,
        sampling_rate: usize,
    ) -> Self {
        Self {
            machine1,
            machine2,
            resampler,
            sampling_rate,
        }
    }

    #[cfg(test)]
    pub fn slot(&self, machine: MachineId) -> &MachineSlot {
        match machine {
            MachineId::Machine1 => &self.machine1,
            MachineId::Machine2 => &self.machine2,
        }
    }

    fn slot_mut(&mut self, machine: MachineId) -> &mut MachineSlot {
        match machine {
            MachineId::Machine1 => &mut self.machine1,
            MachineId::Machine2 => &mut self.machine2,
        }
    }

    /// Route one vibration message through both machines
    ///
    /// A failure in one machine's pipeline does not keep the other from
    /// running; the first error seen is returned once both are done,
    /// with an empty-hour rollup ranked below any other failure.
    pub async fn add_vib(&mut self, message: &VibMessage) -> Result<StageActivity> {
        let mut activity = StageActivity::default();
        let mut result = Ok(());

        for machine in MachineId::ALL {
            let (left, right) = message.channels(machine);
            let (reached, outcome) = self.vib_for_machine(machine, left, right).await;
            activity = activity.merge(reached);
            result = combine(result, outcome);
        }

        result.map(|()| activity)
    }

    /// Route one temperature message through both machines
    pub async fn add_temp(&mut self, message: &TempMessage) -> Result<StageActivity> {
        let mut activity = StageActivity::default();
        let mut result = Ok(());

        for machine in MachineId::ALL {
            let data = message.channel(machine);
            let (reached, outcome) = self.temp_for_machine(machine, data).await;
            activity = activity.merge(reached);
            result = combine(result, outcome);
        }

        result.map(|()| activity)
    }

    async fn vib_for_machine(
        &mut self,
        machine: MachineId,
        left: &[f64],
        right: &[f64],
    ) -> (StageActivity, Result<()>) {
        let rollup = self.slot_mut(machine).rollup.add_vib(left, right).await;
        log_stage_error(machine, "rollup", &rollup);

        let resampled = self
            .resample(left)
            .and_then(|l| self.resample(right).map(|r| (l, r)));
        let batch = match resampled {
            Ok((left, right)) => self.slot_mut(machine).batch.add_vib(&left, &right).await,
            Err(e) => Err(e),
        };
        log_stage_error(machine, "batch", &batch);

        settle(rollup, batch)
    }

    async fn temp_for_machine(&mut self, machine: MachineId, data: &[f64]) -> (StageActivity, Result<()>) {
        let rollup = self.slot_mut(machine).rollup.add_temp(data).await;
        log_stage_error(machine, "rollup", &rollup);

        let batch = match self.resample(data) {
            Ok(resampled) => self.slot_mut(machine).batch.add_temp(&resampled).await,
            Err(e) => Err(e),
        };
        log_stage_error(machine, "batch", &batch);

        settle(rollup, batch)
    }

    fn resample(&self, data: &[f64]) -> Result<Vec<f64>> {
        self.resampler.resample(data, self.sampling_rate)
    }
}

/// Fold one machine's rollup and batch outcomes into activity and one result
fn settle(
    rollup: Result<bool>,
    batch: Result<Option<InferenceResult>>,
) -> (StageActivity, Result<()>) {
    let verdict = batch.as_ref().ok().and_then(|v| v.as_ref());
    let activity = StageActivity {
        inference: verdict.is_some(),
        storage: matches!(rollup, Ok(true)) || verdict.map_or(false, |v| v.anomaly),
    };
    (activity, combine(rollup.map(|_| ()), batch.map(|_| ())))
}

/// Keep the earlier error unless it is an empty-hour rollup and a real
/// failure follows
fn combine(current: Result<()>, next: Result<()>) -> Result<()> {
    match (current, next) {
        (Err(MonitorError::DivisionByZero), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
        (Ok(()), next) => next,
    }
}

fn log_stage_error<T>(machine: MachineId, stage: &str, result: &Result<T>) {
    if let Err(e) = result {
        // Empty hours are routine after a restart
        if matches!(e, MonitorError::DivisionByZero) {
            return;
        }
        warn!(machine = %machine, stage, error = %e, "Pipeline stage failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::inference::InferenceDispatch;
    use crate::models::{ChannelBatch, InferenceResult};
    use crate::normalize::IdentityNormalizer;
    use crate::resample::{FourierResampler, LinearResampler};
    use crate::storage::{MemoryAnomalyStore, MemoryRollupStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Records the machine name of every dispatch, failing for one machine
    #[derive(Default)]
    struct RecordingInference {
        calls: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl InferenceDispatch for RecordingInference {
        async fn score(&self, _batch: ChannelBatch, machine_name: &str) -> Result<InferenceResult> {
            self.calls.lock().unwrap().push(machine_name.to_string());
            if self.fail_for.as_deref() == Some(machine_name) {
                return Err(MonitorError::InferenceFailure("boom".to_string()));
            }
            Ok(InferenceResult {
                anomaly: false,
                name: machine_name.to_string(),
                score: 0.0,
                threshold: 1.0,
                remaining_time: None,
            })
        }
    }

    fn start_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
        ))
    }

    fn dispatcher(
        batch_size: usize,
        sampling_rate: usize,
        inference: Arc<RecordingInference>,
        resampler: Arc<dyn Resampler>,
    ) -> IngestionDispatcher {
        dispatcher_with_clock(batch_size, sampling_rate, inference, resampler, start_clock())
    }

    fn dispatcher_with_clock(
        batch_size: usize,
        sampling_rate: usize,
        inference: Arc<RecordingInference>,
        resampler: Arc<dyn Resampler>,
        clock: Arc<ManualClock>,
    ) -> IngestionDispatcher {
        let slot = |machine: MachineId| {
            MachineSlot::new(
                RollupAccumulator::new(
                    machine.name(),
                    Arc::new(MemoryRollupStore::new()),
                    clock.clone(),
                ),
                AnomalyBatchProcessor::new(
                    machine.name(),
                    batch_size,
                    Arc::new(IdentityNormalizer),
                    inference.clone(),
                    Arc::new(MemoryAnomalyStore::new()),
                ),
            )
        };
        IngestionDispatcher::new(
            slot(MachineId::Machine1),
            slot(MachineId::Machine2),
            resampler,
            sampling_rate,
        )
    }

    fn vib(m1: Vec<f64>, m2: Vec<f64>) -> VibMessage {
        VibMessage {
            time: "2024-03-01 09:15:00".to_string(),
            machine1_left: m1.clone(),
            machine1_right: m1,
            machine2_left: m2.clone(),
            machine2_right: m2,
        }
    }

    fn temp(m1: Vec<f64>, m2: Vec<f64>) -> TempMessage {
        TempMessage {
            time: "2024-03-01 09:15:00".to_string(),
            machine1: m1,
            machine2: m2,
        }
    }

    #[tokio::test]
    async fn test_rollup_gets_raw_batch_gets_resampled() {
        let inference = Arc::new(RecordingInference::default());
        let mut d = dispatcher(100, 4, inference, Arc::new(LinearResampler));

        d.add_vib(&vib(vec![1.0, 2.0], vec![3.0, 4.0, 5.0])).await.unwrap();
        d.add_temp(&temp(vec![20.0], vec![21.0, 22.0])).await.unwrap();

        let m1 = d.slot(MachineId::Machine1);
        assert_eq!(m1.rollup.pending_counts(), (2, 2, 1));
        assert_eq!(m1.batch.pending_lens(), (4, 4, 4));

        let m2 = d.slot(MachineId::Machine2);
        assert_eq!(m2.rollup.pending_counts(), (3, 3, 2));
        assert_eq!(m2.batch.pending_lens(), (4, 4, 4));
    }

    #[tokio::test]
    async fn test_machine1_dispatches_before_machine2() {
        let inference = Arc::new(RecordingInference::default());
        let mut d = dispatcher(2, 2, inference.clone(), Arc::new(FourierResampler::new()));

        d.add_vib(&vib(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
        d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();

        assert_eq!(
            *inference.calls.lock().unwrap(),
            vec!["machine1".to_string(), "machine2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_machine1_failure_does_not_block_machine2() {
        let inference = Arc::new(RecordingInference {
            calls: Mutex::new(Vec::new()),
            fail_for: Some("machine1".to_string()),
        });
        let mut d = dispatcher(2, 2, inference.clone(), Arc::new(FourierResampler::new()));

        d.add_vib(&vib(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
        let result = d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await;

        assert!(matches!(result, Err(MonitorError::InferenceFailure(_))));
        assert_eq!(inference.calls.lock().unwrap().len(), 2);
        assert_eq!(d.slot(MachineId::Machine1).batch.pending_lens(), (0, 0, 0));
        assert_eq!(d.slot(MachineId::Machine2).batch.pending_lens(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_empty_hour_does_not_hide_inference_failure() {
        for failing in ["machine1", "machine2"] {
            let inference = Arc::new(RecordingInference {
                calls: Mutex::new(Vec::new()),
                fail_for: Some(failing.to_string()),
            });
            let clock = start_clock();
            let mut d =
                dispatcher_with_clock(4, 2, inference.clone(), Arc::new(LinearResampler), clock.clone());

            d.add_vib(&vib(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
            d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();

            // Closes 09:00 and drains every statistic
            clock.advance(chrono::Duration::hours(1));
            d.add_vib(&vib(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();

            // 10:00 closes with no vibration readings while both batches fill up
            clock.advance(chrono::Duration::hours(1));
            let result = d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await;

            assert!(
                matches!(result, Err(MonitorError::InferenceFailure(_))),
                "failing {}: got {:?}",
                failing,
                result
            );
            assert_eq!(inference.calls.lock().unwrap().len(), 2);
            for machine in MachineId::ALL {
                assert_eq!(d.slot(machine).rollup.pending_counts(), (0, 0, 0));
                assert_eq!(d.slot(machine).batch.pending_lens(), (0, 0, 0));
            }
        }
    }

    #[tokio::test]
    async fn test_activity_reports_reached_stages() {
        let inference = Arc::new(RecordingInference::default());
        let clock = start_clock();
        let mut d = dispatcher_with_clock(2, 2, inference, Arc::new(LinearResampler), clock.clone());

        let queued = d.add_vib(&vib(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
        assert_eq!(queued, StageActivity::default());

        let scored = d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
        assert_eq!(
            scored,
            StageActivity {
                inference: true,
                storage: false
            }
        );

        clock.advance(chrono::Duration::hours(1));
        let rolled_up = d.add_temp(&temp(vec![1.0, 2.0], vec![1.0, 2.0])).await.unwrap();
        assert_eq!(
            rolled_up,
            StageActivity {
                inference: false,
                storage: true
            }
        );
    }

    #[tokio::test]
    async fn test_empty_hour_alone_is_reported() {
        let inference = Arc::new(RecordingInference::default());
        let clock = start_clock();
        let mut d = dispatcher_with_clock(100, 2, inference, Arc::new(LinearResampler), clock.clone());

        d.add_temp(&temp(vec![1.0], vec![1.0])).await.unwrap();
        clock.advance(chrono::Duration::hours(1));
        let result = d.add_temp(&temp(vec![1.0], vec![1.0])).await;

        assert!(matches!(result, Err(MonitorError::DivisionByZero)));
    }

    #[tokio::test]
    async fn test_empty_channel_is_resampling_failure_but_rollup_runs() {
        let inference = Arc::new(RecordingInference::default());
        let mut d = dispatcher(2, 2, inference, Arc::new(FourierResampler::new()));

        let result = d.add_temp(&temp(vec![], vec![5.0])).await;

        assert!(matches!(result, Err(MonitorError::ResamplingFailure(_))));
        assert_eq!(d.slot(MachineId::Machine1).batch.pending_lens(), (0, 0, 0));
        assert_eq!(d.slot(MachineId::Machine2).rollup.pending_counts(), (0, 0, 1));
        assert_eq!(d.slot(MachineId::Machine2).batch.pending_lens(), (0, 0, 2));
    }
}
