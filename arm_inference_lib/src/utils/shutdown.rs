//! Cooperative cancellation via a `watch` channel carrying "stop requested".

use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Receiver that flips to `true` on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current step");
            let _ = tx.send(true);
        }
    });
    rx
}

pub fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once stop is requested. Never resolves if the sender is gone
/// without having requested a stop.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `duration`; returns `false` if stop was requested first.
pub async fn sleep_unless_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
