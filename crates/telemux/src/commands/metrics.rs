//! `telemux metrics <ids..>`: print every sample as it arrives.

use std::sync::Arc;

use tokio::sync::mpsc;

use telemux_config::TelemuxConfig;
use telemux_core::{Envelope, HistoryBuffer, Hub, MetricSample, MetricsStream, Topic};

use crate::cli::{GlobalOpts, MetricsArgs, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output::{self, Renderer};

use super::{forward, report_state, stop_signal};

pub async fn handle(
    args: MetricsArgs,
    config: &TelemuxConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let hub = Hub::new(config::hub_config(config)?);
    let renderer = Renderer::new(global.output, global.color);

    // Histories for the closing summary; the channel carries every sample.
    let stream = hub.metrics(&args.devices);
    let (tx, rx) = mpsc::unbounded_channel();
    let _printers: Vec<_> = args
        .devices
        .iter()
        .map(|id| forward(&hub, Topic::metrics(id), tx.clone()))
        .collect();
    drop(tx);

    hub.connect();
    let result = pump(&hub, &stream, &renderer, &args, global.quiet, rx).await;

    if result.is_ok() && global.output == OutputFormat::Text {
        for id in stream.devices() {
            if let Some(history) = stream.history(&id) {
                output::status(&history_line(&id, &history), global.quiet);
            }
        }
    }
    hub.shutdown();
    result
}

async fn pump(
    hub: &Hub,
    stream: &MetricsStream,
    renderer: &Renderer,
    args: &MetricsArgs,
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
                let Some(sample) = envelope.as_metrics() else {
                    continue;
                };
                output::emit(&renderer.sample(sample, stream.color(&sample.device_id))?)?;
                printed += 1;
                if args.count.is_some_and(|n| printed >= n) {
                    return Ok(());
                }
            }
        }
    }
}

fn history_line(device_id: &str, history: &HistoryBuffer<MetricSample>) -> String {
    let cpu: Vec<f64> = history.iter().filter_map(|s| s.cpu_percent).collect();
    if cpu.is_empty() {
        return format!("{device_id}: {} samples", history.len());
    }
    let count = f64::from(u32::try_from(cpu.len()).unwrap_or(u32::MAX));
    let avg = cpu.iter().sum::<f64>() / count;
    format!("{device_id}: {} samples, avg cpu {avg:.1}%", history.len())
}
