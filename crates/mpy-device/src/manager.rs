//! Device manager: one session per port path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mpy_protocol::strip_echo;
use mpy_transport::{Inbound, Link};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::identity::DeviceIdentity;
use crate::session::DeviceSession;

/// Deadline for opening a port in [`DeviceManager::connect_and_execute`].
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns the open sessions, keyed by port path.
#[derive(Debug, Default)]
pub struct DeviceManager {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Arc<DeviceSession>>>,
}

impl DeviceManager {
    pub fn new(config: SessionConfig) -> Self {
        DeviceManager {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to a device, reusing the open session for its path.
    pub async fn connect(&self, identity: DeviceIdentity) -> DeviceResult<Arc<DeviceSession>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&identity.path) {
            if session.is_connected() {
                if session.identity().capabilities.brk {
                    session.send_break()?;
                }
                return Ok(session.clone());
            }
            debug!(path = %identity.path, "dropping stale session");
            sessions.remove(&identity.path);
        }

        let path = identity.path.clone();
        let session = Arc::new(DeviceSession::connect(identity, self.config.clone()).await?);
        sessions.insert(path, session.clone());
        Ok(session)
    }

    /// Register a session on an already open link.
    pub async fn attach(&self, identity: DeviceIdentity, link: Link) -> DeviceResult<Arc<DeviceSession>> {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&identity.path).is_some_and(|s| s.is_connected()) {
            return Err(DeviceError::Busy(format!("{} is already connected", identity.path)));
        }
        let path = identity.path.clone();
        let session = Arc::new(DeviceSession::attach(identity, self.config.clone(), link));
        sessions.insert(path, session.clone());
        Ok(session)
    }

    /// Open session for `path`, if any.
    pub async fn session(&self, path: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().await.get(path).cloned()
    }

    pub async fn connected_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Disconnect `path`. Unknown paths are ignored.
    pub async fn disconnect(&self, path: &str) -> DeviceResult<()> {
        let session = self.sessions.lock().await.remove(path);
        match session {
            Some(session) => session.disconnect().await,
            None => Ok(()),
        }
    }

    /// Disconnect every session, logging failures.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (path, session) in sessions {
            if let Err(e) = session.disconnect().await {
                warn!(path = %path, error = %e, "disconnect failed");
            }
        }
    }

    /// Open a temporary connection, send `command`, and return what the
    /// device prints within the settle delay.
    ///
    /// Any session already open on the path is closed first.
    pub async fn connect_and_execute(&self, identity: &DeviceIdentity, command: &str) -> DeviceResult<String> {
        self.disconnect(&identity.path).await?;
        let baud_rate = identity.baud_rate.unwrap_or(self.config.baud_rate);
        let link = tokio::time::timeout(OPEN_TIMEOUT, mpy_transport::open(&identity.path, baud_rate))
            .await
            .map_err(|_| DeviceError::Timeout(format!("opening {}", identity.path)))??;
        execute_once(link, command, self.config.settle_delay()).await
    }
}

/// Write `command` on `link`, collect output for `settle`, then close.
///
/// The echoed command is removed from the returned text.
pub async fn execute_once(link: Link, command: &str, settle: Duration) -> DeviceResult<String> {
    let Link { transport, mut inbound } = link;
    transport.write(command.as_bytes())?;
    transport.drain().await?;

    let deadline = Instant::now() + settle;
    let mut buffer = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, inbound.recv()).await {
            Ok(Some(Inbound::Data(data))) => buffer.extend_from_slice(&data),
            Ok(Some(Inbound::Closed(_))) | Ok(None) | Err(_) => break,
        }
    }

    if let Err(e) = transport.close().await {
        warn!(path = %transport.path(), error = %e, "failed to close temporary connection");
    }
    Ok(strip_echo(&String::from_utf8_lossy(&buffer), command))
}
