//! TCP accept loop for the Goster-WY endpoint.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::identity::IdentityManager;
use crate::runtime::DeviceRuntime;
use crate::session::Session;
use crate::storage::DataStore;

/// Shared handles every session task needs. Ownership is strictly
/// downward: sessions hold this, and this holds the store.
pub struct ServerState {
    pub identity: Arc<IdentityManager>,
    pub runtime: Arc<DeviceRuntime>,
    pub store: Arc<dyn DataStore>,
    pub config: ServerConfig,
}

/// Accept connections until cancelled, spawning one session task each.
/// A slow session never blocks the accept loop or its siblings.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Device ingestion listener ready");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Accept loop shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Device connected");
                        let session = Session::new(stream, peer.to_string(), Arc::clone(&state));
                        tokio::spawn(session.run(cancel.child_token()));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        }
    }
}
