//! Core data models for the monitoring pipeline

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two monitored machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineId {
    Machine1,
    Machine2,
}

impl MachineId {
    pub const ALL: [MachineId; 2] = [MachineId::Machine1, MachineId::Machine2];

    /// Display name used in inference calls, anomaly records and logs
    pub fn name(&self) -> &'static str {
        match self {
            MachineId::Machine1 => "machine1",
            MachineId::Machine2 => "machine2",
        }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw vibration event; every channel carries the same number of readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibMessage {
    pub time: String,
    pub machine1_left: Vec<f64>,
    pub machine1_right: Vec<f64>,
    pub machine2_left: Vec<f64>,
    pub machine2_right: Vec<f64>,
}

impl VibMessage {
    /// Left/right pair for one machine
    pub fn channels(&self, machine: MachineId) -> (&[f64], &[f64]) {
        match machine {
            MachineId::Machine1 => (&self.machine1_left, &self.machine1_right),
            MachineId::Machine2 => (&self.machine2_left, &self.machine2_right),
        }
    }
}

/// Raw temperature event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempMessage {
    pub time: String,
    pub machine1: Vec<f64>,
    pub machine2: Vec<f64>,
}

impl TempMessage {
    pub fn channel(&self, machine: MachineId) -> &[f64] {
        match machine {
            MachineId::Machine1 => &self.machine1,
            MachineId::Machine2 => &self.machine2,
        }
    }
}

/// Event delivered by the inbound transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum SensorEvent {
    Vib(VibMessage),
    Temp(TempMessage),
}

impl SensorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorEvent::Vib(_) => "vib",
            SensorEvent::Temp(_) => "temp",
        }
    }
}

/// One lock-step batch of the three channels of a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelBatch {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub temp: Vec<f64>,
}

impl ChannelBatch {
    pub fn new(left: Vec<f64>, right: Vec<f64>, temp: Vec<f64>) -> Self {
        Self { left, right, temp }
    }
}

/// Structured result of one inference dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub anomaly: bool,
    pub name: String,
    pub score: f64,
    pub threshold: f64,
    /// Estimated time to failure, when the model produces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<f64>,
}

/// Outbound emission for monitoring subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum MonitorEvent {
    Vib(VibMessage),
    Temp(TempMessage),
    Model(InferenceResult),
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Vib(_) => "vib",
            MonitorEvent::Temp(_) => "temp",
            MonitorEvent::Model(_) => "model",
        }
    }
}

impl From<SensorEvent> for MonitorEvent {
    fn from(event: SensorEvent) -> Self {
        match event {
            SensorEvent::Vib(m) => MonitorEvent::Vib(m),
            SensorEvent::Temp(m) => MonitorEvent::Temp(m),
        }
    }
}

/// Hourly or daily average of absolute readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRecord {
    pub timestamp: NaiveDateTime,
    pub avg_left: f64,
    pub avg_right: f64,
    pub avg_temp: f64,
}

/// Persisted record of a batch whose score reached its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub machine_name: String,
    pub score: f64,
    pub threshold: f64,
    pub timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_names() {
        assert_eq!(MachineId::Machine1.name(), "machine1");
        assert_eq!(MachineId::Machine2.to_string(), "machine2");
    }

    #[test]
    fn test_vib_message_deserialize() {
        let json = r#"{
            "time": "2024-03-01 10:00:00",
            "machine1_left": [1.0, 2.0],
            "machine1_right": [3.0, 4.0],
            "machine2_left": [5.0, 6.0],
            "machine2_right": [7.0, 8.0]
        }"#;
        let msg: VibMessage = serde_json::from_str(json).unwrap();

        let (left, right) = msg.channels(MachineId::Machine2);
        assert_eq!(left, &[5.0, 6.0]);
        assert_eq!(right, &[7.0, 8.0]);
    }

    #[test]
    fn test_monitor_event_tagging() {
        let event = MonitorEvent::Model(InferenceResult {
            anomaly: true,
            name: "machine1".to_string(),
            score: 12.5,
            threshold: 10.0,
            remaining_time: None,
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "model");
        assert_eq!(json["data"]["anomaly"], true);
        assert!(json["data"].get("remaining_time").is_none());
    }
}
