//! Listener lifecycle: accept until a shutdown signal, then drain

use std::future::Future;
use std::io;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::shutdown::{GracefulShutdown, ShutdownResult};

/// Serve `app` until `signal` resolves. The listener is closed before
/// existing connections are drained, so nothing new arrives mid-drain.
pub async fn serve_with_drain<S>(
    listener: TcpListener,
    app: Router,
    graceful: GracefulShutdown,
    signal: S,
) -> io::Result<ShutdownResult>
where
    S: Future<Output = &'static str>,
{
    let (stop_accepting, accepting_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = accepting_stopped.await;
            })
            .await
    });

    let reason = signal.await;
    let _ = stop_accepting.send(());
    tracing::info!(reason, "Stopped accepting connections");

    let result = graceful.execute(reason).await;

    server.await.map_err(io::Error::other)??;
    Ok(result)
}
