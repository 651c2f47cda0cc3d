//! `telemux alerts`: print the alert feed, optionally filtered by severity.

use std::sync::Arc;

use tokio::sync::mpsc;

use telemux_config::TelemuxConfig;
use telemux_core::{Aggregator, AlertsStream, Envelope, Hub, Topic};

use crate::cli::{AlertsArgs, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output::{self, Renderer};

use super::{forward, report_state, stop_signal};

pub async fn handle(
    args: AlertsArgs,
    config: &TelemuxConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let hub = Hub::new(config::hub_config(config)?);
    let renderer = Renderer::new(global.output, global.color);

    let tally = Aggregator::new();
    let feed = AlertsStream::new(&hub.context().with_aggregator(Arc::clone(&tally)));
    let (tx, rx) = mpsc::unbounded_channel();
    let _printer = forward(&hub, Topic::alerts(), tx);

    hub.connect();
    let result = pump(&hub, &renderer, &args, global.quiet, rx).await;

    if result.is_ok() && global.output == OutputFormat::Text {
        let summary = tally.summary();
        output::status(
            &format!(
                "{} alerts retained ({} critical, {} warning, {} info)",
                feed.len(),
                summary.critical_alerts,
                summary.warning_alerts,
                summary.info_alerts,
            ),
            global.quiet,
        );
    }
    hub.shutdown();
    result
}

async fn pump(
    hub: &Hub,
    renderer: &Renderer,
    args: &AlertsArgs,
    quiet: bool,
    mut rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
) -> Result<(), CliError> {
    let mut state_rx = hub.connection_state();
    // The transport may already have given up before we subscribed.
    let initial = state_rx.borrow_and_update().clone();
    report_state(&initial, hub, renderer, quiet)?;
    let stop = stop_signal(args.stream.duration);
    tokio::pin!(stop);
    let mut printed = 0_usize;

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
            Some(envelope) = rx.recv() => {
                let Some(alert) = envelope.as_alert() else {
                    continue;
                };
                if alert.severity < args.min_severity {
                    continue;
                }
                output::emit(&renderer.alert(alert)?)?;
                printed += 1;
                if args.count.is_some_and(|n| printed >= n) {
                    return Ok(());
                }
            }
        }
    }
}
