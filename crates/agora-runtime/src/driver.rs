//! Async driver: ticks a client on a fixed interval

use std::sync::Arc;
use std::time::Duration;

use agora_core::AgoraResult;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::Client;

/// Tick `client` every `tick` until `shutdown` turns true, its sender is
/// dropped, or the client stops being active. The UI shares the client
/// through the mutex; the lock is never held across an await.
pub async fn run(
    client: Arc<Mutex<Client>>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> AgoraResult<()> {
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last);
                last = now;

                let mut client = client.lock();
                match client.tick(dt) {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(error = %e, "tick failed"),
                }
                if !client.is_active() {
                    info!(state = ?client.state(), "client stopped, driver exiting");
                    return Ok(());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("driver shut down");
                    return Ok(());
                }
            }
        }
    }
}
