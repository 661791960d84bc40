mod generate;
mod run;
mod setup;
mod status;

pub use generate::cmd_generate;
pub use run::cmd_run;
pub use setup::cmd_setup;
pub use status::cmd_status;

use lifestream_pg::ShutdownTx;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Trigger `shutdown` on SIGINT or SIGTERM.
///
/// Abort the returned handle once the guarded work finishes on its own.
pub(crate) fn spawn_signal_listener(shutdown: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.shutdown();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to register SIGTERM handler, listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            info!("sigint (ctrl+c) received, shutting down");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("sigint (ctrl+c) received, shutting down"),
        _ = sigterm.recv() => info!("sigterm received, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("ctrl+c received, shutting down");
}
