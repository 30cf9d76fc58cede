use crate::acquisition::{AcquisitionEngine, CalibratedSample};
use crate::hardware::{NetworkLink, OutputLine};
use crate::state_sync::{RemoteStateStore, StateSyncEngine, SyncState};
use crate::telemetry_reporter::{ReportOutcome, TelemetryReporter};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// What happened during one pass of the control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sample: CalibratedSample,
    pub notifications: usize,
    pub telemetry: ReportOutcome,
}

/// Drives acquisition, state synchronization and telemetry from a single
/// cooperative loop. Nothing here runs in parallel, so the engines need no
/// locking; notification delivery is serviced every cycle and while idle.
pub struct Controller<S, O, L> {
    acquisition: AcquisitionEngine,
    sync: StateSyncEngine<S, O>,
    telemetry: TelemetryReporter,
    link: L,
    loop_delay: Duration,
    resubscribe_interval: Duration,
    last_subscribe: Option<Instant>,
}

impl<S, O, L> Controller<S, O, L>
where
    S: RemoteStateStore,
    O: OutputLine,
    L: NetworkLink,
{
    pub fn new(
        acquisition: AcquisitionEngine,
        sync: StateSyncEngine<S, O>,
        telemetry: TelemetryReporter,
        link: L,
        loop_delay: Duration,
        resubscribe_interval: Duration,
    ) -> Self {
        Self {
            acquisition,
            sync,
            telemetry,
            link,
            loop_delay,
            resubscribe_interval,
            last_subscribe: None,
        }
    }

    pub fn sync(&self) -> &StateSyncEngine<S, O> {
        &self.sync
    }

    pub fn acquisition(&self) -> &AcquisitionEngine {
        &self.acquisition
    }

    /// Calibrates the current sensor, then opens the state subscription.
    pub async fn start(&mut self) {
        self.acquisition.calibrate_offset();
        self.subscribe().await;
        info!("System ready");
    }

    async fn subscribe(&mut self) {
        self.last_subscribe = Some(Instant::now());
        self.sync.subscribe().await;
    }

    fn resubscribe_due(&self, now: Instant) -> bool {
        self.sync.state() == SyncState::Disconnected
            && self
                .last_subscribe
                .map_or(true, |last| now.saturating_duration_since(last) >= self.resubscribe_interval)
    }

    /// One pass: acquire, deliver pending notifications, then report if due.
    pub async fn run_cycle(&mut self) -> CycleReport {
        if self.resubscribe_due(Instant::now()) {
            info!("Stream not running, retrying subscription");
            self.subscribe().await;
        }

        let sample = self.acquisition.acquire();
        debug!(
            "T:{:.1}C H:{:.0}% L:{:.0} V:{:.0}v I:{:.2}A P:{:.1}W",
            sample.temperature,
            sample.humidity,
            sample.lux,
            sample.voltage_rms,
            sample.current_rms,
            sample.power
        );

        let notifications = self.sync.pump();
        let telemetry = self
            .telemetry
            .poll(Instant::now(), &sample, &self.link)
            .await;

        CycleReport {
            sample,
            notifications,
            telemetry,
        }
    }

    /// Waits out `period`, applying notifications as soon as they arrive.
    /// Returns the number handled.
    pub async fn idle(&mut self, period: Duration) -> usize {
        let deadline = Instant::now() + period;
        let mut handled = 0;
        loop {
            let event = tokio::select! {
                _ = sleep_until(deadline) => break,
                event = self.sync.next_event() => event,
            };
            match event {
                Some(event) => {
                    self.sync.handle(event);
                    handled += 1;
                }
                None => {
                    sleep_until(deadline).await;
                    break;
                }
            }
        }
        handled
    }

    /// Runs forever.
    pub async fn run(mut self) {
        self.start().await;
        loop {
            self.run_cycle().await;
            self.idle(self.loop_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SensorBank;
    use crate::actuator::ActuatorBank;
    use crate::config::{Config, SamplingConfig, TelemetryConfig};
    use crate::hardware::LinkStatus;
    use crate::notification::NotificationKind;
    use crate::simulated::{ConstantSource, FlakyClimate, RelayLine, SineSource};
    use crate::state_sync::{notification_queue, StreamEvent};
    use crate::telemetry_client::TelemetryClient;
    use tokio::sync::mpsc::Sender;

    struct CountingStore {
        accept: bool,
        attempts: usize,
    }

    impl RemoteStateStore for CountingStore {
        async fn begin_stream(&mut self, _path: &str) -> anyhow::Result<()> {
            self.attempts += 1;
            if self.accept {
                Ok(())
            } else {
                anyhow::bail!("unreachable")
            }
        }
    }

    fn controller(
        accept: bool,
        resubscribe_interval: Duration,
    ) -> (Controller<CountingStore, RelayLine, LinkStatus>, Sender<StreamEvent>) {
        let config = Config::default();
        let sampling = SamplingConfig {
            voltage_sample_delay_us: 0,
            current_sample_delay_us: 0,
            calibration_delay_us: 0,
            calibration_samples: 100,
            ..config.sampling.clone()
        };
        let sensors = SensorBank {
            voltage: Box::new(SineSource::new(2048.0, 1000.0, 20, 4095)),
            current: Box::new(SineSource::new(1990.0, 300.0, 20, 4095)),
            light: Box::new(ConstantSource(1500)),
            climate: Box::new(FlakyClimate::new(23.0, 40.0, 0)),
            battery: None,
        };
        let acquisition = AcquisitionEngine::new(sensors, sampling);

        let (tx, rx) = notification_queue(8);
        let bank = ActuatorBank::new(&config.actuators, RelayLine::new);
        let store = CountingStore { accept, attempts: 0 };
        let sync = StateSyncEngine::new(store, "app/switchStates", bank, rx);

        let client = TelemetryClient::new(&TelemetryConfig::default()).unwrap();
        let telemetry = TelemetryReporter::new(client, Duration::from_secs(3600), Instant::now());

        let controller = Controller::new(
            acquisition,
            sync,
            telemetry,
            LinkStatus::new(false),
            Duration::from_millis(10),
            resubscribe_interval,
        );
        (controller, tx)
    }

    #[tokio::test]
    async fn test_cycle_acquires_and_applies_notifications() {
        let (mut controller, tx) = controller(true, Duration::from_secs(15));
        controller.start().await;
        assert_eq!(controller.sync().state(), SyncState::Streaming);
        assert!((controller.acquisition().current_offset() - 1990.0).abs() < 1.0);

        tx.send(StreamEvent::Notification(NotificationKind::Leaf { id: 4, value: true }))
            .await
            .unwrap();

        let report = controller.run_cycle().await;
        assert_eq!(report.notifications, 1);
        assert_eq!(report.telemetry, ReportOutcome::NotDue);
        assert!(report.sample.voltage_rms > 0.0);
        assert!(report.sample.current_rms > 0.0);
        assert_eq!(report.sample.power, report.sample.voltage_rms * report.sample.current_rms);
        assert_eq!(report.sample.lux, 2595.0);
        assert_eq!(controller.sync().actuators().state(4), Some(true));
    }

    #[tokio::test]
    async fn test_idle_services_notifications() {
        let (mut controller, tx) = controller(true, Duration::from_secs(15));
        controller.start().await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx
                .send(StreamEvent::Notification(NotificationKind::Leaf { id: 2, value: true }))
                .await;
        });

        let handled = controller.idle(Duration::from_millis(200)).await;
        assert_eq!(handled, 1);
        assert_eq!(controller.sync().actuators().state(2), Some(true));
    }

    #[tokio::test]
    async fn test_failed_subscription_is_retried_on_interval() {
        let (mut controller, _tx) = controller(false, Duration::from_millis(50));
        controller.start().await;
        assert_eq!(controller.sync().state(), SyncState::Disconnected);

        controller.run_cycle().await;
        assert_eq!(controller.sync().store().attempts, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        controller.run_cycle().await;
        assert_eq!(controller.sync().store().attempts, 2);
    }
}
