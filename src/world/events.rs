//! Sync events delivered over a channel
//!
//! [`ChannelNotifier`] turns notifier callbacks into [`SyncEvent`] values so
//! an application thread (or a test) can consume them from a
//! `crossbeam_channel` receiver.

use crate::networking::telemetry::TelemetrySnapshot;
use crate::world::host::SyncNotifier;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEventKind {
    PlayerJoined { avatar_id: String },
    PlayerLeft { avatar_id: String },
    FatalConnectionError { message: String },
    ServerNotice { message: String },
    Telemetry(TelemetrySnapshot),
}

#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<SyncEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, Receiver<SyncEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    fn emit(&self, kind: SyncEventKind) {
        // nobody listening is fine
        let _ = self.sender.send(SyncEvent {
            kind,
            timestamp: SystemTime::now(),
        });
    }
}

impl SyncNotifier for ChannelNotifier {
    fn player_joined(&self, avatar_id: &str) {
        self.emit(SyncEventKind::PlayerJoined {
            avatar_id: avatar_id.to_string(),
        });
    }

    fn player_left(&self, avatar_id: &str) {
        self.emit(SyncEventKind::PlayerLeft {
            avatar_id: avatar_id.to_string(),
        });
    }

    fn fatal_connection_error(&self, message: &str) {
        self.emit(SyncEventKind::FatalConnectionError {
            message: message.to_string(),
        });
    }

    fn server_notice(&self, message: &str) {
        self.emit(SyncEventKind::ServerNotice {
            message: message.to_string(),
        });
    }

    fn telemetry(&self, snapshot: &TelemetrySnapshot) {
        self.emit(SyncEventKind::Telemetry(snapshot.clone()));
    }
}
