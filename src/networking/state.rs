//! Connection state machine
//!
//! Tracks the lifecycle of the relay connection. The machine is shared
//! between the tick side and the I/O loop through [`SharedConnectionState`],
//! which also carries the fault that ended the last session until someone
//! reports it.

use crate::networking::telemetry::TelemetrySnapshot;
use crate::networking::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Faulted => write!(f, "Faulted"),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    previous_state: Option<ConnectionState>,
    transition_count: u64,
    /// Bumped on every connect attempt so a stale I/O loop cannot fault a newer session
    generation: u64,
    unreported_fault: Option<SyncError>,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Disconnected` state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            previous_state: None,
            transition_count: 0,
            generation: 0,
            unreported_fault: None,
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> ConnectionState {
        self.current_state
    }

    /// Get the previous state
    pub fn previous_state(&self) -> Option<ConnectionState> {
        self.previous_state
    }

    /// Get the number of transitions made so far
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Get the generation of the latest connect attempt
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if a state transition is valid
    pub fn can_transition_to(&self, new_state: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self.current_state, new_state) {
            (Disconnected, Connecting) => true,

            (Connecting, Handshaking) => true,
            (Connecting, Faulted) => true,

            (Handshaking, Connected) => true,
            (Handshaking, Faulted) => true,

            (Connected, Faulted) => true,
            (Connected, Disconnected) => true, // explicit disconnect

            (Faulted, Disconnected) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state
    ///
    /// Entering `Connecting` starts a new generation and drops any fault the
    /// previous session left unreported.
    pub fn transition_to(&mut self, new_state: ConnectionState) -> SyncResult<()> {
        if !self.can_transition_to(new_state) {
            return Err(SyncError::InvalidTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let old_state = self.current_state;
        debug!(
            "Connection state: {} -> {} (transition #{})",
            old_state,
            new_state,
            self.transition_count + 1
        );

        self.previous_state = Some(old_state);
        self.current_state = new_state;
        self.transition_count += 1;

        match new_state {
            ConnectionState::Connecting => {
                self.generation += 1;
                self.unreported_fault = None;
            }
            ConnectionState::Connected => info!("Connected to relay"),
            ConnectionState::Disconnected if old_state == ConnectionState::Connected => {
                info!("Disconnected from relay")
            }
            _ => {}
        }

        Ok(())
    }

    /// Move to `Faulted` and keep `error` until it is reported
    ///
    /// Only the first fault of a session is kept.
    pub fn fault(&mut self, error: SyncError) -> SyncResult<()> {
        self.transition_to(ConnectionState::Faulted)?;
        warn!("Connection faulted: {}", error);
        self.unreported_fault = Some(error);
        Ok(())
    }

    /// Hand out the stored fault, at most once
    pub fn take_unreported_fault(&mut self) -> Option<SyncError> {
        self.unreported_fault.take()
    }

    /// Check if the relay session is live
    pub fn is_connected(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Check if a connect attempt is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.current_state,
            ConnectionState::Connecting | ConnectionState::Handshaking
        )
    }

    /// Check if the last session ended in a fault
    pub fn is_faulted(&self) -> bool {
        self.current_state == ConnectionState::Faulted
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-plane cell shared by the manager, the I/O loop and the consumer
#[derive(Debug, Default)]
pub struct SharedConnectionState {
    machine: Mutex<ConnectionStateMachine>,
    telemetry: Mutex<Option<TelemetrySnapshot>>,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.machine.lock().current_state()
    }

    /// Get the generation of the live or latest session
    pub fn generation(&self) -> u64 {
        self.machine.lock().generation()
    }

    /// Attempt to transition to a new state
    pub fn transition_to(&self, new_state: ConnectionState) -> SyncResult<()> {
        self.machine.lock().transition_to(new_state)
    }

    /// Fault the connection regardless of which session reported it
    pub fn fault(&self, error: SyncError) -> SyncResult<()> {
        self.machine.lock().fault(error)
    }

    /// Fault the connection only if `generation` is still the live session
    pub fn fault_session(&self, generation: u64, error: SyncError) -> bool {
        let mut machine = self.machine.lock();
        if machine.generation() != generation || !machine.is_connected() {
            debug!("Ignoring fault from stale session {}: {}", generation, error);
            return false;
        }
        machine.fault(error).is_ok()
    }

    /// Hand out the fault that ended the last session, at most once
    pub fn take_unreported_fault(&self) -> Option<SyncError> {
        self.machine.lock().take_unreported_fault()
    }

    /// Replace the latest telemetry snapshot
    pub fn publish_telemetry(&self, snapshot: TelemetrySnapshot) {
        *self.telemetry.lock() = Some(snapshot);
    }

    /// Get the latest telemetry snapshot
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.telemetry.lock().clone()
    }

    /// Forget the snapshot of a finished session
    pub fn clear_telemetry(&self) {
        *self.telemetry.lock() = None;
    }
}
