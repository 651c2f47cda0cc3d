//! `telemux watch`: live dashboard summary.
//!
//! Feeds one aggregator from the metrics, container and alert adapters and
//! (when `inventory_url` is configured) from a periodic inventory poll.
//! Prints a summary line whenever the summary changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use telemux_api::InventoryClient;
use telemux_config::TelemuxConfig;
use telemux_core::{
    Aggregator, AlertsStream, ContainerStream, CoreError, Hub, MetricsStream,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output::{self, Renderer};

use super::{report_state, stop_signal};

pub async fn handle(
    args: WatchArgs,
    config: &TelemuxConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let hub = Hub::new(config::hub_config(config)?);
    let renderer = Renderer::new(global.output, global.color);
    let aggregator = Aggregator::new();

    let poller = if args.no_inventory {
        None
    } else {
        spawn_inventory_poll(config, Arc::clone(&aggregator))?
    };

    let ctx = hub.context().with_aggregator(Arc::clone(&aggregator));
    let _metrics = MetricsStream::new(&ctx, &args.devices);
    let _containers = ContainerStream::new(&ctx, &args.devices);
    let _alerts = AlertsStream::new(&ctx);

    hub.connect();
    let result = pump(&hub, &aggregator, &renderer, &args, global.quiet).await;

    if let Some(handle) = poller {
        handle.abort();
    }
    hub.shutdown();
    result
}

async fn pump(
    hub: &Hub,
    aggregator: &Aggregator,
    renderer: &Renderer,
    args: &WatchArgs,
    quiet: bool,
) -> Result<(), CliError> {
    let mut state_rx = hub.connection_state();
    // The transport may already have given up before we subscribed.
    let initial = state_rx.borrow_and_update().clone();
    report_state(&initial, hub, renderer, quiet)?;
    let mut summary_rx = aggregator.watch();
    let mut failures = hub.listener_errors();
    let stop = stop_signal(args.stream.duration);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => return Ok(()),
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = state_rx.borrow_and_update().clone();
                report_state(&state, hub, renderer, quiet)?;
            }
            changed = summary_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let summary = summary_rx.borrow_and_update().clone();
                output::emit(&renderer.summary(&summary)?)?;
            }
            failure = failures.recv() => match failure {
                Ok(failure) => debug!(topic = %failure.topic, error = %failure.error, "listener failed"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "listener failure reports dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Start polling the inventory endpoint, if one is configured.
fn spawn_inventory_poll(
    config: &TelemuxConfig,
    aggregator: Arc<Aggregator>,
) -> Result<Option<JoinHandle<()>>, CliError> {
    let Some(base) = config
        .inventory_base()
        .map_err(|e| CliError::from_config("<resolved>", e))?
    else {
        return Ok(None);
    };
    let client = InventoryClient::new(base, &config.transport_config()).map_err(CoreError::from)?;
    let interval = config.poll_interval();
    Ok(Some(tokio::spawn(poll_inventory(client, aggregator, interval))))
}

async fn poll_inventory(client: InventoryClient, aggregator: Arc<Aggregator>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match client.fetch_inventory().await {
            Ok(inventory) => aggregator.apply_inventory(inventory),
            Err(e) => {
                let err = CoreError::from(e);
                warn!(url = %client.base_url(), error = %err, "inventory poll failed");
            }
        }
    }
}
