//! Shared application state.
//!
//! Every long-lived resource is created once in [`crate::bootstrap`] and
//! handed down from here; nothing in the gateway reaches for globals.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use mnemon_domain::config::Config;

use crate::api::protocol::ServerFrame;
use crate::auth::AuthVerifier;
use crate::runtime::continuum_pool::ContinuumPool;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::user_lock::UserRequestLock;

/// Active chat connections, for the shutdown broadcast.
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: Mutex<HashMap<Uuid, mpsc::UnboundedSender<ServerFrame>>>,
}

impl ConnectionRegistry {
    pub fn register(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<ServerFrame>) {
        self.senders.lock().insert(connection_id, sender);
    }

    pub fn remove(&self, connection_id: Uuid) {
        self.senders.lock().remove(&connection_id);
    }

    /// Send `server_shutdown` to every live session and drop the senders,
    /// which closes the writer tasks.
    pub fn shutdown_all(&self) {
        let mut senders = self.senders.lock();
        let count = senders.len();
        for (_, sender) in senders.drain() {
            let _ = sender.send(ServerFrame::ServerShutdown {
                message: "Server is shutting down".into(),
            });
        }
        if count > 0 {
            tracing::info!(connections = count, "shutdown broadcast sent");
        }
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub system_prompt: Arc<String>,
    pub db: Arc<Mutex<rusqlite::Connection>>,
    pub pool: Arc<ContinuumPool>,
    pub orchestrator: Arc<Orchestrator>,
    pub user_lock: Arc<UserRequestLock>,
    pub auth: Arc<AuthVerifier>,
    pub connections: Arc<ConnectionRegistry>,
}
