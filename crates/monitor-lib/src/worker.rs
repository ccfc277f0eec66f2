//! Ingestion worker
//!
//! One task owns the dispatcher and the archiver and consumes sensor
//! events from a bounded channel strictly in arrival order. This is the
//! only place per-machine state is mutated, so no locks are needed around
//! the pipelines.

use crate::archive::RawArchiver;
use crate::dispatcher::IngestionDispatcher;
use crate::error::MonitorError;
use crate::health::{components, HealthRegistry};
use crate::models::{MonitorEvent, SensorEvent};
use crate::observability::MonitorMetrics;
use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Default capacity of the inbound event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Counts reported when the worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
}

pub struct IngestionWorker {
    events_rx: mpsc::Receiver<SensorEvent>,
    dispatcher: IngestionDispatcher,
    archiver: Option<RawArchiver>,
    outbound: Option<broadcast::Sender<MonitorEvent>>,
    health: Option<HealthRegistry>,
    metrics: MonitorMetrics,
    stats: WorkerStats,
}

impl IngestionWorker {
    /// Consume events until shutdown or until every sender is dropped
    ///
    /// Events already queued when shutdown is signalled are still
    /// processed before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> WorkerStats {
        info!("Starting ingestion worker");
        self.set_health(components::INGESTION, None).await;

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.process(event).await,
                        None => {
                            info!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down ingestion worker");
                    self.events_rx.close();
                    while let Some(event) = self.events_rx.recv().await {
                        self.process(event).await;
                    }
                    break;
                }
            }
        }

        if let Some(health) = &self.health {
            health
                .mark_stopped(components::INGESTION, "ingestion worker stopped")
                .await;
        }

        info!(
            processed = self.stats.processed,
            failed = self.stats.failed,
            "Ingestion worker stopped"
        );
        self.stats
    }

    /// Archive, dispatch, then re-broadcast one event
    pub async fn process(&mut self, event: SensorEvent) {
        let kind = event.kind();
        self.metrics.inc_events_ingested(kind);

        let mut failed = false;

        if let Some(archiver) = self.archiver.as_mut() {
            let archived = archiver.archive(&event);
            if let Err(e) = &archived {
                warn!(kind, error = %e, "Failed to archive raw event");
                self.metrics.inc_pipeline_errors(e.kind());
                failed = true;
            }
            self.set_health(components::ARCHIVE, archived.err()).await;
        }

        let dispatched = match &event {
            SensorEvent::Vib(message) => self.dispatcher.add_vib(message).await,
            SensorEvent::Temp(message) => self.dispatcher.add_temp(message).await,
        };
        match dispatched {
            Ok(activity) => {
                self.set_health(components::INGESTION, None).await;
                if activity.inference {
                    self.set_health(components::INFERENCE, None).await;
                }
                if activity.storage {
                    self.set_health(components::STORAGE, None).await;
                }
            }
            Err(e) => {
                self.metrics.inc_pipeline_errors(e.kind());
                // An hour closing without readings is not a fault
                if !matches!(e, MonitorError::DivisionByZero) {
                    debug!(kind, error = %e, "Dispatch reported an error");
                    failed = true;
                    let component = match e {
                        MonitorError::PersistenceFailure(_) => components::STORAGE,
                        MonitorError::InferenceFailure(_) | MonitorError::Normalization(_) => {
                            components::INFERENCE
                        }
                        _ => components::INGESTION,
                    };
                    self.set_health(component, Some(e)).await;
                }
            }
        }

        if let Some(outbound) = &self.outbound {
            // No subscribers is fine
            let _ = outbound.send(MonitorEvent::from(event));
        }

        self.stats.processed += 1;
        if failed {
            self.stats.failed += 1;
        }
    }

    async fn set_health(&self, component: &str, error: Option<MonitorError>) {
        let Some(health) = &self.health else {
            return;
        };
        match error {
            None => health.record_success(component).await,
            Some(e) => health.record_failure(component, e.to_string()).await,
        }
    }
}

/// Builder wiring the worker to its channel and collaborators
pub struct IngestionWorkerBuilder {
    dispatcher: Option<IngestionDispatcher>,
    archiver: Option<RawArchiver>,
    outbound: Option<broadcast::Sender<MonitorEvent>>,
    health: Option<HealthRegistry>,
    channel_capacity: usize,
}

impl IngestionWorkerBuilder {
    pub fn new() -> Self {
        Self {
            dispatcher: None,
            archiver: None,
            outbound: None,
            health: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn dispatcher(mut self, dispatcher: IngestionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn archiver(mut self, archiver: RawArchiver) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Channel that receives every raw event after processing
    pub fn outbound(mut self, outbound: broadcast::Sender<MonitorEvent>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Build the worker and the sender feeding it
    pub fn build(self) -> Result<(IngestionWorker, mpsc::Sender<SensorEvent>)> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| anyhow::anyhow!("Dispatcher is required"))?;

        let (events_tx, events_rx) = mpsc::channel(self.channel_capacity);
        let worker = IngestionWorker {
            events_rx,
            dispatcher,
            archiver: self.archiver,
            outbound: self.outbound,
            health: self.health,
            metrics: MonitorMetrics::new(),
            stats: WorkerStats::default(),
        };

        Ok((worker, events_tx))
    }
}

impl Default for IngestionWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
