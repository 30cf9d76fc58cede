use crate::acquisition::CalibratedSample;
use crate::hardware::NetworkLink;
use crate::telemetry_client::{TelemetryClient, TelemetryPayload};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of one telemetry poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    NotDue,
    SkippedLinkDown,
    Sent(reqwest::StatusCode),
    Failed(String),
}

/// Pushes the latest sample to the telemetry endpoint on a fixed interval.
/// Delivery is best effort: a skipped or failed report is simply dropped.
pub struct TelemetryReporter {
    client: TelemetryClient,
    interval: Duration,
    last_attempt: Instant,
}

impl TelemetryReporter {
    /// The first report becomes due one interval after `start`.
    pub fn new(client: TelemetryClient, interval: Duration, start: Instant) -> Self {
        Self {
            client,
            interval,
            last_attempt: start,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_attempt) >= self.interval
    }

    /// Sends a report if the interval has elapsed. The interval restarts
    /// whether or not anything was sent.
    pub async fn poll(
        &mut self,
        now: Instant,
        sample: &CalibratedSample,
        link: &impl NetworkLink,
    ) -> ReportOutcome {
        if !self.is_due(now) {
            return ReportOutcome::NotDue;
        }
        self.last_attempt = now;

        if !link.is_connected() {
            info!("Network not connected, skipping sensor data send.");
            return ReportOutcome::SkippedLinkDown;
        }

        let payload = TelemetryPayload::from(sample);
        debug!("Sending sensor data: {payload:?}");
        match self.client.send(&payload).await {
            Ok(status) => {
                info!("Telemetry accepted with {status}");
                ReportOutcome::Sent(status)
            }
            Err(e) => {
                warn!("Error on sending telemetry: {e:#}");
                ReportOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::hardware::LinkStatus;
    use mockito::Matcher;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn sample(voltage_rms: f32, current_rms: f32) -> CalibratedSample {
        CalibratedSample {
            voltage_rms,
            current_rms,
            power: voltage_rms * current_rms,
            temperature: 22.0,
            humidity: 50.0,
            lux: 900.0,
            battery_level: None,
        }
    }

    fn reporter(url: String, start: Instant) -> TelemetryReporter {
        let config = TelemetryConfig {
            endpoint_url: url,
            device_api_key: "key".to_string(),
            ..TelemetryConfig::default()
        };
        TelemetryReporter::new(TelemetryClient::new(&config).unwrap(), INTERVAL, start)
    }

    #[tokio::test]
    async fn test_not_due_before_interval() {
        let start = Instant::now();
        let mut reporter = reporter("http://127.0.0.1:9/api/data".to_string(), start);
        let link = LinkStatus::new(true);

        let outcome = reporter
            .poll(start + Duration::from_secs(9), &sample(230.0, 1.0), &link)
            .await;
        assert_eq!(outcome, ReportOutcome::NotDue);
    }

    #[tokio::test]
    async fn test_link_down_skips_then_sends_latest_sample() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/data")
            .match_header("Device-API-Key", "key")
            .match_body(Matcher::PartialJson(json!({"voltage": 240.0, "current": 2.0, "power": 480.0})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let start = Instant::now();
        let mut reporter = reporter(format!("{}/api/data", server.url()), start);
        let link = LinkStatus::new(false);

        let outcome = reporter
            .poll(start + INTERVAL, &sample(230.0, 1.0), &link)
            .await;
        assert_eq!(outcome, ReportOutcome::SkippedLinkDown);

        // Link restored, but the next interval has not elapsed yet
        link.set_connected(true);
        let outcome = reporter
            .poll(start + INTERVAL + Duration::from_secs(1), &sample(235.0, 1.5), &link)
            .await;
        assert_eq!(outcome, ReportOutcome::NotDue);

        let outcome = reporter
            .poll(start + INTERVAL * 2, &sample(240.0, 2.0), &link)
            .await;
        assert_eq!(outcome, ReportOutcome::Sent(reqwest::StatusCode::OK));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_send_is_dropped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/data")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let start = Instant::now();
        let mut reporter = reporter(format!("{}/api/data", server.url()), start);
        let link = LinkStatus::new(true);

        let outcome = reporter.poll(start + INTERVAL, &sample(230.0, 1.0), &link).await;
        assert!(matches!(outcome, ReportOutcome::Failed(_)));

        // No retry before the next interval
        let outcome = reporter
            .poll(start + INTERVAL + Duration::from_secs(5), &sample(230.0, 1.0), &link)
            .await;
        assert_eq!(outcome, ReportOutcome::NotDue);

        let outcome = reporter.poll(start + INTERVAL * 2, &sample(230.0, 1.0), &link).await;
        assert!(matches!(outcome, ReportOutcome::Failed(_)));

        mock.assert_async().await;
    }
}
