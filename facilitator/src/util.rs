//! Shutdown signal handling.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Returns a cancellation token that trips on SIGTERM or SIGINT.
///
/// The token gates the facilitator's two-phase shutdown: the HTTP server
/// stops accepting payments when it trips, after which the bridge worker
/// drains its in-flight jobs. Anything still unfinished lands back in the
/// job store and is resumed by the recovery scan on the next boot.
pub fn shutdown_token() -> Result<CancellationToken, std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, draining"),
            _ = sigint.recv() => tracing::info!("received SIGINT, draining"),
        }
        trip.cancel();
    });
    Ok(token)
}
