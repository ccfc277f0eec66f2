//! Assembly of the ingestion pipeline from configuration

use crate::config::MonitorConfig;
use anyhow::{Context, Result};
use monitor_lib::archive::RawArchiver;
use monitor_lib::batch::AnomalyBatchProcessor;
use monitor_lib::clock::{Clock, SystemClock};
use monitor_lib::dispatcher::{IngestionDispatcher, MachineSlot};
use monitor_lib::inference::{
    FallbackScoreModel, InferenceDispatch, OnnxScoreModel, ScoreModel, ThresholdScorer,
};
use monitor_lib::normalize::{IdentityNormalizer, MinMaxNormalizer, Normalizer};
use monitor_lib::resample::FourierResampler;
use monitor_lib::rollup::RollupAccumulator;
use monitor_lib::storage::{AnomalyStore, RollupStore, SqliteAnomalyStore, SqliteRollupStore};
use monitor_lib::worker::{IngestionWorker, IngestionWorkerBuilder};
use monitor_lib::{HealthRegistry, MachineId, MonitorEvent, SensorEvent, StructuredLogger};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// Capacity of the outbound monitoring channel
const OUTBOUND_CAPACITY: usize = 256;

/// Read-side handles shared with the HTTP layer
#[derive(Clone)]
pub struct Stores {
    pub rollups: HashMap<MachineId, Arc<dyn RollupStore>>,
    pub anomalies: Arc<dyn AnomalyStore>,
}

/// Everything `main` needs to run the service
pub struct Pipeline {
    pub worker: IngestionWorker,
    pub ingest_tx: mpsc::Sender<SensorEvent>,
    pub events: broadcast::Sender<MonitorEvent>,
    pub stores: Stores,
    pub model_version: String,
}

/// Open stores, load models and wire both machines into one worker
pub fn build(
    config: &MonitorConfig,
    health: HealthRegistry,
    logger: StructuredLogger,
) -> Result<Pipeline> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (events, _) = broadcast::channel(OUTBOUND_CAPACITY);

    let model = load_model(config)?;
    let model_version = model.model_version().to_string();

    let thresholds = config
        .machines
        .iter()
        .map(|m| (m.name.clone(), m.threshold))
        .collect();
    let scorer: Arc<dyn InferenceDispatch> = Arc::new(
        ThresholdScorer::new(model, thresholds)
            .with_events(events.clone())
            .with_timeout(Duration::from_millis(config.inference_timeout_ms)),
    );

    let normalizer: Arc<dyn Normalizer> = match &config.normalization_path {
        Some(path) => Arc::new(
            MinMaxNormalizer::load(path)
                .with_context(|| format!("Failed to load normalization table {:?}", path))?,
        ),
        None => Arc::new(IdentityNormalizer),
    };

    let anomalies: Arc<dyn AnomalyStore> = Arc::new(
        SqliteAnomalyStore::open(&config.anomaly_db)
            .with_context(|| format!("Failed to open anomaly database {:?}", config.anomaly_db))?,
    );

    let mut rollups: HashMap<MachineId, Arc<dyn RollupStore>> = HashMap::new();
    let mut slots = Vec::with_capacity(MachineId::ALL.len());
    for id in MachineId::ALL {
        let machine = config.machine(id)?;
        let store: Arc<dyn RollupStore> = Arc::new(
            SqliteRollupStore::open(&machine.rollup_db)
                .with_context(|| format!("Failed to open rollup database {:?}", machine.rollup_db))?,
        );
        rollups.insert(id, store.clone());

        let rollup = RollupAccumulator::new(id.name(), store, clock.clone())
            .with_logger(logger.clone());
        let batch = AnomalyBatchProcessor::new(
            id.name(),
            config.batch_size,
            normalizer.clone(),
            scorer.clone(),
            anomalies.clone(),
        )
        .with_clock(clock.clone())
        .with_logger(logger.clone());

        slots.push(MachineSlot::new(rollup, batch));
    }

    let machine2 = slots.pop().context("machine2 slot missing")?;
    let machine1 = slots.pop().context("machine1 slot missing")?;
    let dispatcher = IngestionDispatcher::new(
        machine1,
        machine2,
        Arc::new(FourierResampler::new()),
        config.sampling_rate,
    );

    let mut archiver = RawArchiver::new(&config.raw_directory, clock);
    if let Some(external) = &config.external_directory {
        archiver = archiver.with_external_dir(external);
    }

    let (worker, ingest_tx) = IngestionWorkerBuilder::new()
        .dispatcher(dispatcher)
        .archiver(archiver)
        .outbound(events.clone())
        .health(health)
        .channel_capacity(config.channel_capacity)
        .build()?;

    info!(
        batch_size = config.batch_size,
        sampling_rate = config.sampling_rate,
        model_version = %model_version,
        "Pipeline assembled"
    );

    Ok(Pipeline {
        worker,
        ingest_tx,
        events,
        stores: Stores { rollups, anomalies },
        model_version,
    })
}

fn load_model(config: &MonitorConfig) -> Result<Arc<dyn ScoreModel>> {
    match &config.model_path {
        Some(path) => {
            let model = OnnxScoreModel::from_path(path, config.batch_size)?;
            info!(path = ?path, "Loaded ONNX scoring model");
            Ok(Arc::new(model))
        }
        None => {
            info!("No model configured, scoring with RMS fallback");
            Ok(Arc::new(FallbackScoreModel))
        }
    }
}
