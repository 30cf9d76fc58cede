use energy_monitor_core::acquisition::{AcquisitionEngine, SensorBank};
use energy_monitor_core::actuator::ActuatorBank;
use energy_monitor_core::config::Config;
use energy_monitor_core::controller::Controller;
use energy_monitor_core::hardware::LinkStatus;
use energy_monitor_core::rtdb_stream::RtdbStreamClient;
use energy_monitor_core::simulated::{ConstantSource, FlakyClimate, RelayLine, SineSource};
use energy_monitor_core::state_sync::{notification_queue, StateSyncEngine};
use energy_monitor_core::telemetry_client::TelemetryClient;
use energy_monitor_core::telemetry_reporter::TelemetryReporter;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting energy monitor core");
    let config = Config::load()?;

    // Host build: peripherals are simulated, the remote services are real
    let sampling = &config.sampling;
    let sensors = SensorBank {
        voltage: Box::new(SineSource::new(
            f64::from(sampling.adc_midpoint),
            1200.0,
            50,
            sampling.adc_max,
        )),
        current: Box::new(SineSource::new(1985.0, 250.0, 50, sampling.adc_max)),
        light: Box::new(ConstantSource(1800)),
        climate: Box::new(FlakyClimate::new(24.0, 52.0, 7)),
        battery: Some(Box::new(ConstantSource(3200))),
    };
    let acquisition = AcquisitionEngine::new(sensors, config.sampling.clone());

    let link = LinkStatus::new(false);
    let (events_tx, events_rx) = notification_queue(config.remote.queue_capacity);
    let store = RtdbStreamClient::new(&config.remote, events_tx, link.clone())?;
    let actuators = ActuatorBank::new(&config.actuators, RelayLine::new);
    let sync = StateSyncEngine::new(store, config.remote.state_path.clone(), actuators, events_rx);

    let telemetry = TelemetryReporter::new(
        TelemetryClient::new(&config.telemetry)?,
        config.telemetry.interval(),
        Instant::now(),
    );

    let controller = Controller::new(
        acquisition,
        sync,
        telemetry,
        link,
        config.loop_delay(),
        config.remote.resubscribe_interval(),
    );
    controller.run().await;

    Ok(())
}
