use std::{
    process,
    sync::{Arc, OnceLock},
};

use edgewatch::{
    config::Config,
    core::{
        artifacts::{HttpUploader, SnapshotStore},
        collectors::TelemetryCollector,
        debounce::EventDebouncer,
        link::LinkMonitor,
        router::{DeliveryRouter, Outbound},
        scheduler::{Schedule, Scheduler, Vision},
        spool::Spool,
        supervisor::ConnectionSupervisor,
        vision::CommandDetector,
    },
    logger::LoggerManager,
    print_error,
};
use edgewatch_mqtt::{MqttManager, Publisher};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

/// Detector, debouncer, snapshot store and uploader, or `None` for
/// telemetry-only operation.
fn build_vision(cfg: &Config) -> Option<Vision> {
    let detector = match CommandDetector::from_config(&cfg.vision) {
        Ok(Some(detector)) => detector,
        Ok(None) => return None,
        Err(e) => {
            warn!("Detector unavailable, running telemetry-only: {}", e);
            return None;
        }
    };

    let mut vision = Vision::new(
        Arc::new(detector),
        EventDebouncer::new(cfg.events.cooldown()),
        SnapshotStore::from_config(&cfg.snapshots),
        cfg.events.confidence_threshold,
    );

    match HttpUploader::from_config(&cfg.upload) {
        Ok(Some(uploader)) => {
            info!("Snapshot upload enabled: {}", uploader.url());
            vision = vision.with_uploader(Arc::new(uploader));
        }
        Ok(None) => debug!("Snapshot upload disabled"),
        Err(e) => warn!("Snapshot upload disabled: {}", e),
    }

    Some(vision)
}

async fn wait_for_shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting edgewatch version {}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Device '{}', base topic '{}'",
        cfg.device_id(),
        cfg.transport.base_topic
    );
    debug!("{:#?}", cfg.transport);

    let spool = Spool::open(&cfg.spool).await.unwrap_or_else(|e| {
        error!("Failed to open spool: {}", e);
        process::exit(1);
    });
    match spool.len().await {
        Ok(0) => {}
        Ok(backlog) => info!("Spool holds {} undelivered records", backlog),
        Err(e) => warn!("Spool backlog unknown: {}", e),
    }

    let manager = MqttManager::from_config(cfg.transport.clone()).unwrap_or_else(|e| {
        error!("Failed to create MqttManager: {}", e);
        process::exit(1);
    });
    let instance = Arc::new(manager.build_and_start().await.unwrap_or_else(|e| {
        error!("Failed to build and start MQTT kernel: {}", e);
        process::exit(1);
    }));
    info!("MQTT client started ({}:{})", cfg.transport.host, cfg.transport.port);

    let outbound: Arc<dyn Outbound> = Arc::new(Publisher::new(instance.clone()));
    let router = DeliveryRouter::new(outbound.clone(), spool.clone());

    let stop = CancellationToken::new();
    let supervisor = Arc::new(ConnectionSupervisor::new(
        outbound,
        spool,
        instance.status_topic(),
        cfg.spool.flush_max_records,
    ));
    let supervisor_task = {
        let supervisor = supervisor.clone();
        let monitor = LinkMonitor::new(instance.state());
        let stop = stop.clone();
        tokio::spawn(async move { supervisor.run(monitor, stop).await })
    };

    let mut scheduler = Scheduler::new(
        router,
        Arc::new(TelemetryCollector::default()),
        Schedule::from_config(cfg),
        cfg.device_id(),
        cfg.telemetry_topic(),
        cfg.events_topic(),
    );
    match build_vision(cfg) {
        Some(vision) => scheduler = scheduler.with_vision(vision),
        None => info!("Vision disabled, publishing telemetry only"),
    }
    let scheduler_task = tokio::spawn(scheduler.run(stop.clone()));

    wait_for_shutdown_signal().await;
    stop.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Err(e) = supervisor_task.await {
        error!("Supervisor task failed: {}", e);
    }
    if let Err(e) = supervisor.shutdown(&instance).await {
        warn!("Transport shutdown incomplete: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
