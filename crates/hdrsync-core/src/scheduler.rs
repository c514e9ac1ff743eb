// ── Liveness scheduler ──
//
// A fixed-interval tick into the engine actor. Each tick keeps the host
// task active and makes the actor re-check its digests, so a missed
// change notification is repaired within one interval.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::engine::EngineCommand;

pub(crate) async fn liveness_task(
    commands: mpsc::Sender<EngineCommand>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("liveness tick");
                if commands.send(EngineCommand::LivenessTick).await.is_err() {
                    break;
                }
            }
        }
    }
}
