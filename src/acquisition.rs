//! Signal acquisition and calibration.
//!
//! Converts raw ADC counts into calibrated RMS voltage, RMS current and power,
//! plus the auxiliary environmental readings. Sensor faults never surface as
//! errors: invalid readings are filtered per field and the next cycle is the
//! retry.

use crate::config::SamplingConfig;
use crate::hardware::{AnalogInput, ClimateSensor};
use crate::offset_estimator::CurrentOffsetEstimator;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Latest calibrated readings. `power` is always `voltage_rms * current_rms`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibratedSample {
    pub voltage_rms: f32,
    pub current_rms: f32,
    pub power: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub lux: f32,
    pub battery_level: Option<f32>,
}

/// The fixed sensor set of the device.
pub struct SensorBank {
    pub voltage: Box<dyn AnalogInput + Send>,
    pub current: Box<dyn AnalogInput + Send>,
    pub light: Box<dyn AnalogInput + Send>,
    pub climate: Box<dyn ClimateSensor + Send>,
    pub battery: Option<Box<dyn AnalogInput + Send>>,
}

pub struct AcquisitionEngine {
    sensors: SensorBank,
    config: SamplingConfig,
    offset: CurrentOffsetEstimator,
    latest: CalibratedSample,
}

impl AcquisitionEngine {
    pub fn new(sensors: SensorBank, config: SamplingConfig) -> Self {
        let offset =
            CurrentOffsetEstimator::new(f64::from(config.adc_midpoint), config.ema_decay);
        Self {
            sensors,
            config,
            offset,
            latest: CalibratedSample::default(),
        }
    }

    /// Averages a long run of raw current samples to seed the offset estimate.
    /// Run once at start-up, before any RMS math.
    pub fn calibrate_offset(&mut self) -> f64 {
        info!("Calibrating current sensor offset...");
        let samples = self.config.calibration_samples;
        let delay = self.config.calibration_delay();
        let mut sum = 0.0f64;
        for _ in 0..samples {
            sum += f64::from(self.sensors.current.read_raw());
            pause(delay);
        }
        let offset = sum / samples as f64;
        self.offset.seed(offset);
        info!("Current sensor offset: {offset:.2}");
        offset
    }

    pub fn read_voltage_rms(&mut self) -> f32 {
        let samples = self.config.voltage_samples;
        let delay = self.config.voltage_sample_delay();
        let midpoint = f64::from(self.config.adc_midpoint);
        let mut sum = 0.0f64;
        for _ in 0..samples {
            let deviation = f64::from(self.sensors.voltage.read_raw()) - midpoint;
            sum += deviation * deviation;
            pause(delay);
        }
        let rms = (sum / samples as f64).sqrt() as f32;
        self.counts_to_volts(rms) * self.config.voltage_divider_ratio * self.config.voltage_calibration
    }

    /// Every sample moves the offset estimate before its deviation is taken,
    /// so the baseline keeps tracking drift during normal operation.
    pub fn read_current_rms(&mut self) -> f32 {
        let samples = self.config.current_samples;
        let delay = self.config.current_sample_delay();
        let mut sum = 0.0f64;
        for _ in 0..samples {
            let raw = f64::from(self.sensors.current.read_raw());
            let offset = self.offset.update(raw);
            let centered = raw - offset;
            sum += centered * centered;
            pause(delay);
        }
        let rms = (sum / samples as f64).sqrt() as f32;
        let current = self.counts_to_volts(rms) / self.config.current_sensitivity;
        if current < self.config.noise_floor {
            0.0
        } else {
            current
        }
    }

    /// Refreshes light, climate and battery readings into the latest sample.
    /// A non-finite temperature or humidity keeps the previous value.
    pub fn read_auxiliary(&mut self) {
        let raw_light = self.sensors.light.read_raw();
        self.latest.lux = f32::from(self.config.adc_max.saturating_sub(raw_light));

        let temperature = self.sensors.climate.read_temperature();
        if temperature.is_finite() {
            self.latest.temperature = temperature;
        } else {
            debug!("Temperature read failed, keeping {}", self.latest.temperature);
        }

        let humidity = self.sensors.climate.read_humidity();
        if humidity.is_finite() {
            self.latest.humidity = humidity;
        } else {
            debug!("Humidity read failed, keeping {}", self.latest.humidity);
        }

        if let Some(battery) = self.sensors.battery.as_mut() {
            let raw = battery.read_raw();
            self.latest.battery_level = Some(battery_percent(
                raw,
                self.config.battery_empty_raw,
                self.config.battery_full_raw,
            ));
        }
    }

    /// Runs one full acquisition cycle and returns the refreshed sample.
    pub fn acquire(&mut self) -> CalibratedSample {
        let voltage_rms = self.read_voltage_rms();
        let current_rms = self.read_current_rms();
        self.latest.voltage_rms = voltage_rms;
        self.latest.current_rms = current_rms;
        self.latest.power = voltage_rms * current_rms;
        self.read_auxiliary();
        self.latest
    }

    pub fn latest(&self) -> CalibratedSample {
        self.latest
    }

    pub fn current_offset(&self) -> f64 {
        self.offset.value()
    }

    fn counts_to_volts(&self, counts: f32) -> f32 {
        counts * self.config.vref / f32::from(self.config.adc_max)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Linear map of the raw battery reading onto 0..=100 %.
fn battery_percent(raw: u16, empty: u16, full: u16) -> f32 {
    if full <= empty {
        return 0.0;
    }
    let span = f32::from(full - empty);
    let level = (f32::from(raw) - f32::from(empty)) / span * 100.0;
    level.clamp(0.0, 100.0)
}
