//! Component health for liveness and readiness endpoints
//!
//! Pipeline stages report every outcome. A failure degrades the
//! component; a run of consecutive failures makes it unhealthy, and the
//! next success restores it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component counts as unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    /// Last failure message while not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst component status; healthy when nothing is registered
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked pipeline components
pub mod components {
    pub const INGESTION: &str = "ingestion";
    pub const INFERENCE: &str = "inference";
    pub const STORAGE: &str = "storage";
    pub const ARCHIVE: &str = "archive";

    pub const ALL: [&str; 4] = [INGESTION, INFERENCE, STORAGE, ARCHIVE];
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    unhealthy_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
            unhealthy_after: DEFAULT_UNHEALTHY_AFTER,
        }
    }

    pub fn with_unhealthy_after(mut self, failures: u32) -> Self {
        self.unhealthy_after = failures.max(1);
        self
    }

    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// A stage completed; clears any failure streak
    pub async fn record_success(&self, name: &str) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);

        if entry.status != ComponentStatus::Healthy || entry.consecutive_failures > 0 {
            *entry = ComponentHealth::healthy();
        } else {
            entry.last_check_timestamp = chrono::Utc::now().timestamp();
        }
    }

    /// A stage failed; degrades, or marks unhealthy once the streak is long enough
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.status = if entry.consecutive_failures >= self.unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        entry.message = Some(message.into());
        entry.last_check_timestamp = chrono::Utc::now().timestamp();
    }

    /// The component will not recover on its own
    pub async fn mark_stopped(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);

        entry.status = ComponentStatus::Unhealthy;
        entry.message = Some(message.into());
        entry.last_check_timestamp = chrono::Utc::now().timestamp();
    }

    pub async fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(name).map(|c| c.status)
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("Monitor not yet initialized".to_string())
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
