//! Host-side stand-ins for the device peripherals.

use crate::hardware::{AnalogInput, ClimateSensor, OutputLine};
use std::f64::consts::TAU;
use tracing::info;

/// A relay output that remembers its level and logs every change.
#[derive(Debug, Clone)]
pub struct RelayLine {
    pin: u8,
    level: bool,
    writes: u32,
}

impl RelayLine {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            level: false,
            writes: 0,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn level(&self) -> bool {
        self.level
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl OutputLine for RelayLine {
    fn set_level(&mut self, high: bool) {
        if self.level != high {
            info!("Pin {} -> {}", self.pin, if high { "HIGH" } else { "LOW" });
        }
        self.level = high;
        self.writes += 1;
    }
}

/// A sine wave riding on a DC offset, as seen by an ADC sampling a mains sensor.
#[derive(Debug, Clone)]
pub struct SineSource {
    offset: f64,
    amplitude: f64,
    samples_per_period: u32,
    step: u32,
    adc_max: u16,
}

impl SineSource {
    pub fn new(offset: f64, amplitude: f64, samples_per_period: u32, adc_max: u16) -> Self {
        Self {
            offset,
            amplitude,
            samples_per_period: samples_per_period.max(1),
            step: 0,
            adc_max,
        }
    }
}

impl AnalogInput for SineSource {
    fn read_raw(&mut self) -> u16 {
        let phase = TAU * f64::from(self.step) / f64::from(self.samples_per_period);
        self.step = (self.step + 1) % self.samples_per_period;
        let value = self.offset + self.amplitude * phase.sin();
        value.round().clamp(0.0, f64::from(self.adc_max)) as u16
    }
}

/// A channel that always reads the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSource(pub u16);

impl AnalogInput for ConstantSource {
    fn read_raw(&mut self) -> u16 {
        self.0
    }
}

/// A climate sensor that fails every `fault_every`-th read.
#[derive(Debug, Clone)]
pub struct FlakyClimate {
    temperature: f32,
    humidity: f32,
    fault_every: u32,
    reads: u32,
}

impl FlakyClimate {
    pub fn new(temperature: f32, humidity: f32, fault_every: u32) -> Self {
        Self {
            temperature,
            humidity,
            fault_every,
            reads: 0,
        }
    }

    fn faulted(&mut self) -> bool {
        self.reads = self.reads.wrapping_add(1);
        self.fault_every != 0 && self.reads % self.fault_every == 0
    }
}

impl ClimateSensor for FlakyClimate {
    fn read_temperature(&mut self) -> f32 {
        if self.faulted() {
            f32::NAN
        } else {
            self.temperature
        }
    }

    fn read_humidity(&mut self) -> f32 {
        if self.faulted() {
            f32::NAN
        } else {
            self.humidity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_source_stays_in_adc_range() {
        let mut source = SineSource::new(2048.0, 3000.0, 20, 4095);
        for _ in 0..40 {
            let raw = source.read_raw();
            assert!(raw <= 4095);
        }
    }

    #[test]
    fn test_sine_source_is_centered_on_offset() {
        let mut source = SineSource::new(2000.0, 300.0, 20, 4095);
        let sum: u32 = (0..20).map(|_| u32::from(source.read_raw())).sum();
        assert_eq!(sum / 20, 2000);
    }

    #[test]
    fn test_flaky_climate_faults_periodically() {
        let mut climate = FlakyClimate::new(22.0, 45.0, 3);
        assert_eq!(climate.read_temperature(), 22.0);
        assert_eq!(climate.read_humidity(), 45.0);
        assert!(climate.read_temperature().is_nan());
        assert_eq!(climate.read_humidity(), 45.0);
    }

    #[test]
    fn test_relay_line_counts_writes() {
        let mut line = RelayLine::new(26);
        line.set_level(true);
        line.set_level(true);
        assert!(line.level());
        assert_eq!(line.writes(), 2);
    }
}
