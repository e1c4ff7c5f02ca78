// Server loop module
// Accept loop shared by the application and management listeners

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::connection::{accept_connection, ServerKind};
use crate::config;
use crate::logger;

/// Accept connections until `shutdown` flips to `true`
///
/// The listener is dropped on return; connections already accepted keep
/// running on their own tasks.
pub async fn start_server_loop(
    listener: TcpListener,
    state: Arc<config::AppState>,
    active_connections: Arc<AtomicUsize>,
    kind: ServerKind,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(stream, peer_addr, &state, &active_connections, kind);
                    }
                    Err(e) => match kind {
                        ServerKind::Api => logger::log_api_error(&format!("Failed to accept connection: {e}")),
                        ServerKind::App => logger::log_error(&format!("Failed to accept connection: {e}")),
                    },
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Wait for in-flight connections to finish, up to `grace`
///
/// Returns the number of connections still open when the grace period ended.
pub async fn drain_connections(active_connections: &AtomicUsize, grace: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let open = active_connections.load(Ordering::SeqCst);
        if open == 0 || tokio::time::Instant::now() >= deadline {
            return open;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
