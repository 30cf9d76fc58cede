use anyhow::Context;
use serde_derive::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use std::{env, fs};

/// Everything the core consumes but does not own: calibration constants,
/// the relay wiring table, and remote endpoints with their credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub actuators: Vec<ActuatorConfig>,
    pub remote: RemoteConfig,
    pub telemetry: TelemetryConfig,
    /// Pause between loop iterations, during which notifications are still serviced
    pub loop_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub vref: f32,
    pub adc_max: u16,
    pub adc_midpoint: f32,
    pub voltage_samples: usize,
    pub voltage_sample_delay_us: u64,
    pub voltage_divider_ratio: f32,
    pub voltage_calibration: f32,
    pub current_samples: usize,
    pub current_sample_delay_us: u64,
    /// Sensor output in volts per ampere
    pub current_sensitivity: f32,
    pub calibration_samples: usize,
    pub calibration_delay_us: u64,
    /// Weight kept by the offset estimator on every sample; the raw sample gets `1 - ema_decay`
    pub ema_decay: f64,
    /// Currents below this many amperes read as zero
    pub noise_floor: f32,
    pub battery_empty_raw: u16,
    pub battery_full_raw: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    pub id: u32,
    pub line: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub database_url: String,
    pub auth_token: String,
    pub state_path: String,
    pub idle_timeout_secs: u64,
    pub queue_capacity: usize,
    pub resubscribe_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub endpoint_url: String,
    pub device_api_key: String,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            actuators: default_actuators(),
            remote: RemoteConfig::default(),
            telemetry: TelemetryConfig::default(),
            loop_delay_ms: 2000,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            vref: 3.3,
            adc_max: 4095,
            adc_midpoint: 2048.0,
            voltage_samples: 100,
            voltage_sample_delay_us: 200,
            voltage_divider_ratio: (47.0 + 10.0) / 10.0,
            voltage_calibration: 1.25,
            current_samples: 200,
            current_sample_delay_us: 0,
            current_sensitivity: 0.185,
            calibration_samples: 1000,
            calibration_delay_us: 1000,
            ema_decay: 0.999,
            noise_floor: 0.05,
            battery_empty_raw: 2600,
            battery_full_raw: 3500,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            auth_token: String::new(),
            state_path: "app/switchStates".to_string(),
            idle_timeout_secs: 60,
            queue_capacity: 32,
            resubscribe_secs: 15,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            device_api_key: String::new(),
            interval_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

fn default_actuators() -> Vec<ActuatorConfig> {
    [13, 14, 27, 26, 25]
        .into_iter()
        .enumerate()
        .map(|(index, line)| ActuatorConfig {
            id: index as u32 + 1,
            line,
        })
        .collect()
}

impl SamplingConfig {
    pub fn voltage_sample_delay(&self) -> Duration {
        Duration::from_micros(self.voltage_sample_delay_us)
    }

    pub fn current_sample_delay(&self) -> Duration {
        Duration::from_micros(self.current_sample_delay_us)
    }

    pub fn calibration_delay(&self) -> Duration {
        Duration::from_micros(self.calibration_delay_us)
    }
}

impl RemoteConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_secs(self.resubscribe_secs)
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    /// Loads the optional TOML file named by `ENERGY_MONITOR_CONFIG`, then
    /// applies credential overrides from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match env::var("ENERGY_MONITOR_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.remote.database_url, "DATABASE_URL");
        override_from_env(&mut self.remote.auth_token, "DATABASE_AUTH");
        override_from_env(&mut self.telemetry.endpoint_url, "TELEMETRY_URL");
        override_from_env(&mut self.telemetry.device_api_key, "DEVICE_API_KEY");
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let sampling = &self.sampling;
        if sampling.voltage_samples == 0
            || sampling.current_samples == 0
            || sampling.calibration_samples == 0
        {
            anyhow::bail!("Sample counts must be non-zero");
        }
        if !(sampling.ema_decay > 0.0 && sampling.ema_decay < 1.0) {
            anyhow::bail!("ema_decay must lie strictly between 0 and 1");
        }
        if sampling.adc_max == 0 || sampling.current_sensitivity <= 0.0 {
            anyhow::bail!("adc_max and current_sensitivity must be positive");
        }
        if self.remote.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be non-zero");
        }

        let mut seen = HashSet::new();
        for actuator in &self.actuators {
            if actuator.id == 0 {
                anyhow::bail!("Actuator ids start at 1");
            }
            if !seen.insert(actuator.id) {
                anyhow::bail!("Duplicate actuator id {}", actuator.id);
            }
        }
        Ok(())
    }
}

fn override_from_env(field: &mut String, name: &str) {
    let value = env::var(name).unwrap_or_default();
    if !value.is_empty() {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_hardware() {
        let config = Config::default();
        assert_eq!(config.actuators.len(), 5);
        assert_eq!(config.actuators[0].id, 1);
        assert_eq!(config.actuators[0].line, 13);
        assert_eq!(config.actuators[4].id, 5);
        assert_eq!(config.actuators[4].line, 25);
        assert_eq!(config.sampling.voltage_samples, 100);
        assert_eq!(config.sampling.current_samples, 200);
        assert_eq!(config.sampling.calibration_samples, 1000);
        assert_eq!(config.sampling.ema_decay, 0.999);
        assert_eq!(config.sampling.noise_floor, 0.05);
        assert_eq!(config.remote.state_path, "app/switchStates");
        assert_eq!(config.telemetry.interval(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            loop_delay_ms = 500

            [sampling]
            ema_decay = 0.99
            noise_floor = 0.1

            [telemetry]
            interval_ms = 30000
            "#,
        )
        .unwrap();

        assert_eq!(config.loop_delay(), Duration::from_millis(500));
        assert_eq!(config.sampling.ema_decay, 0.99);
        assert_eq!(config.sampling.noise_floor, 0.1);
        assert_eq!(config.sampling.voltage_samples, 100);
        assert_eq!(config.telemetry.interval(), Duration::from_secs(30));
        assert_eq!(config.actuators.len(), 5);
    }

    #[test]
    fn test_custom_actuator_table() {
        let config = Config::from_toml(
            r#"
            [[actuators]]
            id = 1
            line = 23

            [[actuators]]
            id = 2
            line = 22
            "#,
        )
        .unwrap();

        assert_eq!(config.actuators.len(), 2);
        assert_eq!(config.actuators[1].line, 22);
    }

    #[test]
    fn test_rejects_duplicate_actuator_ids() {
        let result = Config::from_toml(
            r#"
            [[actuators]]
            id = 3
            line = 23

            [[actuators]]
            id = 3
            line = 22
            "#,
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "Duplicate actuator id 3"
        );
    }

    #[test]
    fn test_rejects_unstable_decay() {
        let mut config = Config::default();
        config.sampling.ema_decay = 1.0;
        assert!(config.validate().is_err());

        config.sampling.ema_decay = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_sample_count() {
        let mut config = Config::default();
        config.sampling.current_samples = 0;
        assert!(config.validate().is_err());
    }
}
