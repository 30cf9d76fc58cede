//! Energy Monitor Core Library
//!
//! This library provides the control core of a networked energy monitor: it
//! samples mains voltage and current with a self-calibrating offset, keeps relay
//! outputs in line with a remote desired-state store, and periodically reports
//! telemetry to an HTTP endpoint, all from one cooperative loop.

pub mod acquisition;
pub mod actuator;
pub mod config;
pub mod controller;
pub mod hardware;
pub mod notification;
pub mod offset_estimator;
pub mod rtdb_stream;
pub mod simulated;
pub mod state_sync;
pub mod telemetry_client;
pub mod telemetry_reporter;

// Re-export commonly used types for easier access
pub use acquisition::{AcquisitionEngine, CalibratedSample, SensorBank};
pub use actuator::ActuatorBank;
pub use config::Config;
pub use controller::{Controller, CycleReport};
pub use hardware::{LinkStatus, NetworkLink};
pub use notification::NotificationKind;
pub use rtdb_stream::RtdbStreamClient;
pub use state_sync::{notification_queue, StateSyncEngine, StreamEvent, SyncState};
pub use telemetry_client::{TelemetryClient, TelemetryPayload};
pub use telemetry_reporter::{ReportOutcome, TelemetryReporter};
