//! In-process server lifecycle helpers.
//!
//! Used by the CLI, the scenario runner, and the integration tests. The
//! listener is bound before [`spawn_server`] returns, so a returned handle
//! is already accepting connections; pass port 0 for an OS-assigned port.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::serve::SHUTDOWN_TIMEOUT;
use crate::error::ServeError;

/// A running in-process server and its shutdown handle.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

/// Bind `127.0.0.1:port` and serve `router` on a background task.
///
/// Fails with [`ServeError::StartTimeout`] if the bind does not complete
/// within `timeout`.
pub async fn spawn_server(
    router: Router,
    port: u16,
    timeout: Duration,
) -> Result<ServerHandle, ServeError> {
    let requested = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::time::timeout(timeout, TcpListener::bind(requested))
        .await
        .map_err(|_| ServeError::StartTimeout { port, timeout })??;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::debug!(addr = %addr, "server listening");
    Ok(ServerHandle { addr, shutdown: Some(shutdown_tx), task: Some(task) })
}

impl ServerHandle {
    /// The bound address (reflects the OS-assigned port when port 0 was
    /// requested).
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the running server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// MCP endpoint URL of the running server.
    #[must_use]
    pub fn mcp_url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    /// Signal shutdown and wait for the server to drain. Long-lived SSE
    /// connections that outlive the drain window are abandoned.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("server did not drain in time; aborting");
                task.abort();
                // Wait out the cancellation so in-flight captures have
                // finished appending before the caller reads the cassette.
                let _ = task.await;
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
