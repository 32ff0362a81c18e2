use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quarry_host::{AppRegistry, EventKind};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub type SharedRegistry = Arc<Mutex<AppRegistry>>;

pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, AppRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drive the registry at a fixed rate until `shutdown` turns true or its
/// sender goes away. Each tick advances save debounces and fires the `tick`
/// event. All apps are closed on the way out.
///
/// Returns the number of ticks run.
pub async fn run_tick_loop(
    registry: SharedRegistry,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    info!(target: "apphost", "Tick loop started ({:?} per tick)", interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut registry = lock_registry(&registry);
                registry.tick();
                registry.dispatch_event(EventKind::Tick, None, &[]);
                ticks += 1;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    lock_registry(&registry).close_all();
    info!(target: "apphost", "Tick loop stopped after {} ticks", ticks);
    ticks
}

/// Flip `sender` to `true` on Ctrl-C
pub async fn shutdown_on_ctrl_c(sender: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!(target: "apphost", "Received Ctrl-C, shutting down");
            let _ = sender.send(true);
        }
        Err(e) => tracing::error!(target: "apphost", "Failed to listen for Ctrl-C: {}", e),
    }
}
