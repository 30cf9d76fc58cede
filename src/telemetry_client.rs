use crate::acquisition::CalibratedSample;
use crate::config::TelemetryConfig;
use serde_derive::{Deserialize, Serialize};

pub const API_KEY_HEADER: &str = "Device-API-Key";

/// Body posted to the telemetry endpoint, built fresh from one sample.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
    pub temperature: f32,
    pub humidity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f32>,
}

impl From<&CalibratedSample> for TelemetryPayload {
    fn from(sample: &CalibratedSample) -> Self {
        Self {
            voltage: sample.voltage_rms,
            current: sample.current_rms,
            power: sample.power,
            temperature: sample.temperature,
            humidity: sample.humidity,
            battery_level: sample.battery_level,
        }
    }
}

pub struct TelemetryClient {
    endpoint_url: String,
    device_api_key: String,
    client: reqwest::Client,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            endpoint_url: config.endpoint_url.clone(),
            device_api_key: config.device_api_key.clone(),
            client,
        })
    }

    /// Posts one payload. Any transport failure or non-success status is an error.
    pub async fn send(&self, payload: &TelemetryPayload) -> Result<reqwest::StatusCode, anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No telemetry endpoint configured");
        }
        let response = self
            .client
            .post(&self.endpoint_url)
            .header(API_KEY_HEADER, &self.device_api_key)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Endpoint answered {status}: {body}");
        }
        Ok(status)
    }
}
