//! Command dispatch plus the plumbing every streaming command shares.

pub mod alerts;
pub mod config_cmd;
pub mod metrics;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use telemux_config::TelemuxConfig;
use telemux_core::{
    ConnectionState, ConnectionStatus, Envelope, Hub, ListenerError, Subscription, Topic,
};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, Renderer};

/// Dispatch a streaming command.
pub async fn dispatch(
    cmd: Command,
    config: &TelemuxConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, config, global).await,
        Command::Metrics(args) => metrics::handle(args, config, global).await,
        Command::Alerts(args) => alerts::handle(args, config, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "offline command routed to streaming dispatch".into(),
        )),
    }
}

// ── Shared helpers ───────────────────────────────────────────────────

/// Resolves on Ctrl-C or once `duration` has elapsed.
pub(crate) async fn stop_signal(duration: Option<Duration>) {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::debug!("interrupted"),
        () = deadline => tracing::debug!("duration elapsed"),
    }
}

/// Print a connection transition; fail once the transport has given up.
pub(crate) fn report_state(
    state: &ConnectionState,
    hub: &Hub,
    renderer: &Renderer,
    quiet: bool,
) -> Result<(), CliError> {
    if state.status == ConnectionStatus::Disconnected {
        if let Some(ref reason) = state.last_error {
            return Err(CliError::ConnectionFailed {
                url: hub.config().url().to_string(),
                reason: reason.clone(),
            });
        }
    }
    if let Some(line) = renderer.connection(state) {
        output::status(&line, quiet);
    }
    Ok(())
}

/// Forward every envelope on `topic` into a channel, in delivery order.
pub(crate) fn forward(
    hub: &Hub,
    topic: Topic,
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
) -> Subscription {
    hub.registry().subscribe_fn(topic, move |env| {
        tx.send(Arc::clone(env))
            .map_err(|_| ListenerError::new("output closed"))
    })
}
