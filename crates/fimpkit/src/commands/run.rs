//! `fimpkit run`: host the virtual adapter until shutdown.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use fimpkit_api::address::MSG_TYPE_CMD;
use fimpkit_api::{MemoryTransport, MqttTransport, Publisher, Transport};
use fimpkit_config::{mqtt_config, reporting_strategy, router_config, Config};
use fimpkit_core::observer::{Observer, PrimeEvent, PrimeLoader, PRIME_DOMAIN};
use fimpkit_core::{AppBuilder, CoreError, EventFilter, EventManager, ReportingStrategy};

use crate::cli::RunArgs;
use crate::devices::VirtualAdapter;
use crate::error::CliError;

pub async fn handle(cfg: &Config, args: &RunArgs, path: &Path) -> Result<(), CliError> {
    let strategy = reporting_strategy(&cfg.adapter).map_err(|e| CliError::from_config(e, path))?;
    if args.dry_run {
        info!("dry run: using in-process loopback transport");
        host(Arc::new(MemoryTransport::new()), cfg, strategy).await
    } else {
        info!(uri = %cfg.mqtt.uri, "connecting to broker");
        host(Arc::new(MqttTransport::new(mqtt_config(cfg))), cfg, strategy).await
    }
}

async fn host<T: Transport + 'static>(
    transport: Arc<T>,
    cfg: &Config,
    strategy: ReportingStrategy,
) -> Result<(), CliError> {
    let publisher: Arc<dyn Publisher> = transport.clone();
    let transport: Arc<dyn Transport> = transport;
    let channel_id = format!("{}-{}", cfg.adapter.name, cfg.adapter.address);

    let devices = Arc::new(VirtualAdapter::new(cfg, &publisher, strategy));
    let adapter = Arc::clone(devices.adapter());

    let report = Arc::clone(&devices);
    let mut builder = AppBuilder::new(Arc::clone(&transport))
        .channel_id(&channel_id)
        .app_address(adapter.adapter_address(MSG_TYPE_CMD))
        .router_config(router_config(&cfg.router))
        .routings(devices.routings())
        .tasks(devices.report_tasks(cfg.adapter.report_interval()))
        .resetter(devices.clone())
        .extended_report(move || report.extended_report());

    if cfg.observer.enabled {
        let events = EventManager::new();
        let loader = PrimeLoader::new(
            Arc::clone(&transport),
            &channel_id,
            cfg.observer.request_timeout(),
        );
        let observer = Arc::new(Observer::new(
            Arc::new(loader),
            events.clone(),
            cfg.observer.refresh_interval(),
        ));
        builder = builder
            .routing(observer.routing())
            .task(observer.refresh_task());
        log_prime_changes(&events);
    }

    let app = builder.build();
    adapter.set_initialized(true);
    info!(
        adapter = %adapter.name(),
        address = %adapter.address(),
        devices = adapter.things().len(),
        "hosting virtual devices"
    );

    app.run().await.map_err(|e| match e {
        CoreError::Startup { .. } => CliError::Startup {
            uri: cfg.mqtt.uri.clone(),
            source: e,
        },
        other => CliError::Core(other),
    })
}

fn log_prime_changes(events: &EventManager) {
    let mut listener = events.subscribe(EventFilter::domain(PRIME_DOMAIN));
    tokio::spawn(async move {
        while let Some(event) = listener.recv().await {
            match event.payload::<PrimeEvent>() {
                Some(change) => info!(
                    command = %change.command,
                    component = ?change.component,
                    id = ?change.id,
                    "prime catalog changed"
                ),
                None => warn!(class = %event.class, "prime event without payload"),
            }
        }
        debug!("prime event listener closed");
    });
}
