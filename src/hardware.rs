//! Boundaries to the physical world: ADC channels, the climate sensor,
//! relay output lines and the network link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single ADC channel returning raw counts (0..=adc_max).
pub trait AnalogInput {
    fn read_raw(&mut self) -> u16;
}

/// Combined temperature/humidity sensor.
///
/// Transient read failures are reported as `f32::NAN`, the way DHT-class
/// sensors report them.
pub trait ClimateSensor {
    fn read_temperature(&mut self) -> f32;
    fn read_humidity(&mut self) -> f32;
}

/// A digital output driving one relay.
pub trait OutputLine {
    fn set_level(&mut self, high: bool);
}

/// Whether the device currently has a usable network link.
pub trait NetworkLink {
    fn is_connected(&self) -> bool;
}

/// Shared link flag, flipped by whoever owns the connection.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    connected: Arc<AtomicBool>,
}

impl LinkStatus {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl NetworkLink for LinkStatus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
