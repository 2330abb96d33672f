//! Tick-side driver
//!
//! [`SyncClient`] owns the avatar model and the host collaborators. The host
//! calls [`SyncClient::tick`] at its own update rate; each tick publishes the
//! local avatar's request, applies the newest relay frame and, every so
//! often, reconciles remote wardrobes. The I/O loop is only reached through
//! the session mailboxes.

use crate::config::SyncSettings;
use crate::networking::mailbox::SessionMailboxes;
use crate::networking::manager::ConnectionManager;
use crate::networking::state::ConnectionState;
use crate::networking::telemetry::TelemetrySnapshot;
use crate::networking::transport::AddressResolver;
use crate::networking::{SyncError, SyncResult};
use crate::world::avatar::Avatar;
use crate::world::host::{SceneHost, SyncNotifier};
use crate::world::request_builder::build_request;
use crate::world::response_applier::ResponseApplier;
use crate::world::wardrobe::ClothingDiffTracker;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct SyncClient<H: SceneHost, N: SyncNotifier> {
    settings: SyncSettings,
    host: H,
    notifier: N,
    avatars: Vec<Avatar>,
    applier: ResponseApplier,
    wardrobe: ClothingDiffTracker,
    manager: ConnectionManager,
    mailboxes: Option<Arc<SessionMailboxes>>,
    last_telemetry: Option<Instant>,
}

impl<H: SceneHost, N: SyncNotifier> SyncClient<H, N> {
    pub fn new(settings: SyncSettings, host: H, notifier: N) -> SyncResult<Self> {
        Self::with_manager(settings, host, notifier, ConnectionManager::new())
    }

    pub fn with_resolver(
        settings: SyncSettings,
        host: H,
        notifier: N,
        resolver: Box<dyn AddressResolver>,
    ) -> SyncResult<Self> {
        Self::with_manager(settings, host, notifier, ConnectionManager::with_resolver(resolver))
    }

    fn with_manager(
        settings: SyncSettings,
        host: H,
        notifier: N,
        manager: ConnectionManager,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let avatars = enumerate_avatars(&host, settings.local_avatar.as_deref())?;
        info!(
            "Tracking {} avatars, local avatar {:?}",
            avatars.len(),
            settings.local_avatar
        );

        Ok(Self {
            wardrobe: ClothingDiffTracker::new(settings.network.wardrobe_reconcile_interval_ticks),
            settings,
            host,
            notifier,
            avatars,
            applier: ResponseApplier::new(),
            manager,
            mailboxes: None,
            last_telemetry: None,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Replace the settings; the local avatar cannot change while connected
    pub fn update_settings(&mut self, settings: SyncSettings) -> SyncResult<()> {
        settings.validate()?;
        if settings.local_avatar != self.settings.local_avatar {
            if self.manager.is_connected() {
                return Err(SyncError::AlreadyConnected);
            }
            self.avatars = enumerate_avatars(&self.host, settings.local_avatar.as_deref())?;
        }
        self.wardrobe = ClothingDiffTracker::new(settings.network.wardrobe_reconcile_interval_ticks);
        self.settings = settings;
        Ok(())
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn avatars(&self) -> &[Avatar] {
        &self.avatars
    }

    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.applier.online().iter().map(String::as_str)
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Latest published telemetry window of the live session
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.manager.telemetry()
    }

    /// Connect to the configured relay
    ///
    /// A failure is reported through the notifier once and returned.
    pub fn connect(&mut self) -> SyncResult<()> {
        if !matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Faulted
        ) {
            return Err(SyncError::AlreadyConnected);
        }
        self.report_fault();
        self.reset_session_state();

        match self.manager.connect(&self.settings) {
            Ok(connection) => {
                for notice in &connection.notices {
                    warn!("Relay notice: {}", notice);
                    self.notifier.server_notice(notice);
                }
                self.mailboxes = Some(connection.mailboxes);
                Ok(())
            }
            Err(e) => {
                self.report_fault();
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) -> SyncResult<()> {
        self.mailboxes = None;
        let result = self.manager.disconnect();
        self.reset_session_state();
        result
    }

    fn reset_session_state(&mut self) {
        self.mailboxes = None;
        self.applier.reset();
        self.wardrobe.reset();
        self.last_telemetry = None;
        for avatar in &mut self.avatars {
            avatar.reset_session_state();
        }
    }

    fn report_fault(&mut self) {
        if let Some(fault) = self.manager.take_fault() {
            self.mailboxes = None;
            self.notifier.fatal_connection_error(&fault.to_string());
        }
    }

    /// Run one consumer cycle
    pub fn tick(&mut self) {
        self.report_fault();
        if self.state() != ConnectionState::Connected {
            return;
        }
        let Some(mailboxes) = self.mailboxes.clone() else {
            return;
        };
        let lock_timeout = self.settings.network.tick_lock_timeout();

        let local = self.avatars.iter_mut().find(|a| a.is_local);
        let body = build_request(local, &self.host, &self.settings);
        if !body.is_empty() {
            if let Err(e) = mailboxes.outgoing.post(body, lock_timeout) {
                debug!("Request not posted this tick: {}", e);
            }
        }

        match mailboxes.incoming.take(lock_timeout) {
            Ok(Some(payload)) => {
                for (avatar_id, items) in &payload.wardrobes {
                    if let Some(avatar) = self.avatars.iter_mut().find(|a| &a.id == avatar_id) {
                        ClothingDiffTracker::capture(avatar, items);
                    }
                }
                if let Some(frame) = &payload.frame {
                    self.applier.apply(
                        frame,
                        &mut self.avatars,
                        &mut self.host,
                        &self.settings,
                        &self.notifier,
                    );
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Incoming slot skipped this tick: {}", e),
        }

        if self.wardrobe.tick() {
            self.wardrobe.reconcile(&mut self.avatars, &mut self.host);
        }

        if let Some(snapshot) = self.manager.telemetry() {
            if self.last_telemetry != Some(snapshot.published_at) {
                self.last_telemetry = Some(snapshot.published_at);
                self.notifier.telemetry(&snapshot);
            }
        }
    }
}

fn enumerate_avatars<H: SceneHost>(host: &H, local: Option<&str>) -> SyncResult<Vec<Avatar>> {
    let avatars: Vec<Avatar> = host
        .enumerate_controllable_avatars()
        .into_iter()
        .map(|descriptor| {
            let worn = host.worn_items(&descriptor.id);
            let is_local = Some(descriptor.id.as_str()) == local;
            Avatar::from_descriptor(descriptor, worn, is_local)
        })
        .collect();

    if let Some(local) = local {
        if !avatars.iter().any(|a| a.is_local) {
            return Err(SyncError::Config {
                reason: format!("local avatar '{}' is not in the scene", local),
            });
        }
    }
    Ok(avatars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::events::{ChannelNotifier, SyncEventKind};
    use crate::world::scene::InMemoryScene;

    #[test]
    fn unknown_local_avatar_is_a_config_error() {
        let scene = InMemoryScene::new().with_full_rig("Alice");
        let (notifier, _events) = ChannelNotifier::new();
        let settings = SyncSettings {
            local_avatar: Some("Mallory".to_string()),
            ..SyncSettings::default()
        };
        assert!(matches!(
            SyncClient::new(settings, scene, notifier),
            Err(SyncError::Config { .. })
        ));
    }

    #[test]
    fn tick_while_disconnected_is_a_no_op() {
        let scene = InMemoryScene::new().with_full_rig("Alice");
        let (notifier, events) = ChannelNotifier::new();
        let settings = SyncSettings {
            local_avatar: Some("Alice".to_string()),
            ..SyncSettings::default()
        };
        let mut client = SyncClient::new(settings, scene, notifier).unwrap();
        client.tick();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.avatars()[0].is_local);
        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn refused_connection_is_reported_once() {
        let scene = InMemoryScene::new().with_full_rig("Alice");
        let (notifier, events) = ChannelNotifier::new();
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let settings = SyncSettings {
            server_port: port,
            ..SyncSettings::default()
        };
        let mut client = SyncClient::new(settings, scene, notifier).unwrap();

        assert!(client.connect().is_err());
        client.tick();
        client.tick();
        assert_eq!(client.state(), ConnectionState::Faulted);

        let fatal = events
            .try_iter()
            .filter(|e| matches!(e.kind, SyncEventKind::FatalConnectionError { .. }))
            .count();
        assert_eq!(fatal, 1);
    }
}
