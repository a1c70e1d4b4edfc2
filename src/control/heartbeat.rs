use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{constants::HEARTBEAT, sender::ControlSender};

/// Send `heartbeat` now and then every `interval` until the channel is
/// cancelled or the writer is gone.
pub fn spawn_heartbeat(
    sender: ControlSender,
    cancel: CancellationToken,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !sender.send(HEARTBEAT) {
                        break;
                    }
                    trace!("heartbeat #{} queued", sender.sent());
                }
            }
        }
    })
}
