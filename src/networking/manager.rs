//! Connection manager
//!
//! Owns the connect / handshake sequence and the lifetime of the I/O loop.
//! Every successful connect builds a new [`Session`] and loop thread; a
//! disconnect or fault tears both down completely.

use crate::config::SyncSettings;
use crate::networking::mailbox::SessionMailboxes;
use crate::networking::session::Session;
use crate::networking::state::{ConnectionState, SharedConnectionState};
use crate::networking::sync_loop::SyncLoopHandle;
use crate::networking::telemetry::TelemetrySnapshot;
use crate::networking::transport::{self, AddressResolver, SystemResolver, TcpTransport};
use crate::networking::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a successful connect
#[derive(Debug)]
pub struct Connection {
    pub mailboxes: Arc<SessionMailboxes>,
    /// Informational lines the relay sent with its handshake reply
    pub notices: Vec<String>,
}

struct ActiveSession {
    handle: SyncLoopHandle,
    mailboxes: Arc<SessionMailboxes>,
}

pub struct ConnectionManager {
    shared: Arc<SharedConnectionState>,
    resolver: Box<dyn AddressResolver>,
    active: Option<ActiveSession>,
    join_timeout: Duration,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("active", &self.active.is_some())
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create a manager resolving hosts through the system resolver
    pub fn new() -> Self {
        Self::with_resolver(Box::new(SystemResolver))
    }

    /// Create a manager with a custom host resolver
    pub fn with_resolver(resolver: Box<dyn AddressResolver>) -> Self {
        Self {
            shared: Arc::new(SharedConnectionState::new()),
            resolver,
            active: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if a session is live
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Mailboxes of the live session, if any
    pub fn mailboxes(&self) -> Option<Arc<SessionMailboxes>> {
        self.active.as_ref().map(|active| Arc::clone(&active.mailboxes))
    }

    /// The fault that ended the last session, handed out once
    pub fn take_fault(&self) -> Option<SyncError> {
        self.shared.take_unreported_fault()
    }

    /// Latest snapshot published by the I/O loop
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.shared.telemetry()
    }

    /// Connect and handshake with the relay, then start the I/O loop
    ///
    /// On failure the manager is left `Faulted` with the error kept for
    /// [`take_fault`](Self::take_fault).
    pub fn connect(&mut self, settings: &SyncSettings) -> SyncResult<Connection> {
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Faulted => {
                self.teardown();
                self.shared.transition_to(ConnectionState::Disconnected)?;
            }
            _ => return Err(SyncError::AlreadyConnected),
        }

        self.join_timeout = settings.network.join_timeout();
        self.shared.transition_to(ConnectionState::Connecting)?;
        self.shared.clear_telemetry();

        match self.establish(settings) {
            Ok(connection) => Ok(connection),
            Err(e) => {
                error!("Connection to {}:{} failed: {}", settings.server_host, settings.server_port, e);
                self.teardown();
                self.shared.fault(e.clone())?;
                Err(e)
            }
        }
    }

    fn establish(&mut self, settings: &SyncSettings) -> SyncResult<Connection> {
        let tuning = &settings.network;

        let addr = self
            .resolver
            .resolve(&settings.server_host, settings.server_port)?;
        let mut stream = transport::connect(addr, tuning.connect_timeout())?;

        self.shared.transition_to(ConnectionState::Handshaking)?;
        let (reply, leftover) = transport::handshake(
            &mut stream,
            &settings.scene_id,
            tuning.handshake_timeout(),
            tuning.max_partial_frame,
        )?;
        let transport = TcpTransport::from_std(stream, tuning.writable_timeout())?;

        let mailboxes = Arc::new(SessionMailboxes::new());
        let session = Session::new(
            transport,
            Arc::clone(&mailboxes),
            tuning.clone(),
            settings.send_interval(),
            &leftover,
        );

        // the loop may fault as soon as it runs, so be Connected first
        self.shared.transition_to(ConnectionState::Connected)?;
        let handle = SyncLoopHandle::spawn(
            session,
            Arc::clone(&self.shared),
            self.shared.generation(),
            tuning.loop_sleep(),
        )?;
        self.active = Some(ActiveSession {
            handle,
            mailboxes: Arc::clone(&mailboxes),
        });

        info!("Session established with {}", addr);
        Ok(Connection {
            mailboxes,
            notices: reply.notices,
        })
    }

    /// Stop the I/O loop and drop the session
    ///
    /// Lands in `Disconnected` whether the connection was live or faulted.
    pub fn disconnect(&mut self) -> SyncResult<()> {
        if self.active.is_none() && self.state() == ConnectionState::Disconnected {
            return Err(SyncError::NotConnected);
        }

        self.teardown();
        match self.state() {
            ConnectionState::Connected | ConnectionState::Faulted => {
                self.shared.transition_to(ConnectionState::Disconnected)
            }
            _ => Ok(()),
        }
    }

    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.stop(self.join_timeout);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
