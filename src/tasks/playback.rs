mod state;

pub use state::{
    DisplayView, Orchestrator, Phase, PlaybackSettings, PlaybackState, Timers, Timing,
};

use anyhow::Result;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{HostEvent, PlaybackCommand};

/// Drives the [`Orchestrator`] in real time.
///
/// Rules:
/// - Exactly one deadline is awaited at a time: the earliest armed timer.
/// - Preload completions only re-check readiness; they never advance on their own.
/// - `Close` (or cancellation) tears the machine down and ends the task; nothing fires afterwards.
/// - The view is published before the host hears about a change.
/// - Host events never block the loop; they are dropped when the host falls behind.
pub async fn run(
    mut orchestrator: Orchestrator,
    mut commands: Receiver<PlaybackCommand>,
    host: Sender<HostEvent>,
    view: watch::Sender<DisplayView>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut preload_rx = orchestrator.cache().subscribe();
    let mut events = orchestrator.start(Instant::now());

    loop {
        view.send_replace(orchestrator.view());
        emit(&host, events);
        if orchestrator.state().phase == Phase::Closed {
            break;
        }
        let deadline = orchestrator.next_deadline();

        events = select! {
            biased;

            _ = cancel.cancelled() => orchestrator.close(),

            Some(cmd) = commands.recv() => {
                debug!(?cmd, "playback command");
                orchestrator.handle_command(cmd, Instant::now())
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                orchestrator.on_deadline(Instant::now())
            }

            ev = preload_rx.recv() => match ev {
                Ok(ev) => {
                    debug!(?ev, "preload event");
                    orchestrator.on_preload_event(Instant::now())
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "preload events lagged; re-checking readiness");
                    orchestrator.on_preload_event(Instant::now())
                }
                Err(RecvError::Closed) => orchestrator.close(),
            },
        };
    }

    info!(index = orchestrator.state().index, "playback task stopped");
    Ok(())
}

/// Hands events to the host without waiting; a host that stops reading loses events, not timers.
fn emit(host: &Sender<HostEvent>, events: Vec<HostEvent>) {
    for event in events {
        match host.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "host event channel full; dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("host receiver dropped; event not delivered");
            }
        }
    }
}
