//! Vibration monitor service
//!
//! Wires the `monitor_lib` pipeline to configuration, logging and the
//! HTTP surface.

pub mod api;
pub mod config;
pub mod logging;
pub mod pipeline;
