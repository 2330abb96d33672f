use crate::networking::protocol::TargetName;
use crate::networking::{SyncError, SyncResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "settings.toml";

/// Update rates offered to the user, in Hz
pub const UPDATE_FREQUENCY_CHOICES: [u32; 10] = [5, 10, 15, 20, 25, 30, 40, 50, 60, 75];
pub const MAX_UPDATE_FREQUENCY_HZ: u32 = 500;

// =============================================================================
// Network tuning
// =============================================================================

/// Timeouts, bounds and cadences of the connection and I/O loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkTuning {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Bound on the writability check right after the handshake
    pub writable_timeout_ms: u64,
    /// Total time one send may spend flushing before it is resumed next iteration
    pub send_timeout_ms: u64,
    pub send_wait_ms: u64,
    pub receive_wait_ms: u64,
    pub loop_sleep_ms: u64,
    pub io_lock_timeout_ms: u64,
    pub tick_lock_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub max_in_flight: usize,
    /// Age after which an unanswered request stops counting as in flight
    pub response_timeout_ms: u64,
    pub max_partial_frame: usize,
    pub telemetry_window_ms: u64,
    pub wardrobe_reconcile_interval_ticks: u32,
    /// Rate at which the headless client ticks
    pub tick_rate_hz: u32,
}

impl Default for NetworkTuning {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            writable_timeout_ms: 1000,
            send_timeout_ms: 300,
            send_wait_ms: 100,
            receive_wait_ms: 2,
            loop_sleep_ms: 5,
            io_lock_timeout_ms: 500,
            tick_lock_timeout_ms: 200,
            join_timeout_ms: 1000,
            max_in_flight: 12,
            response_timeout_ms: 2000,
            max_partial_frame: 20_000,
            telemetry_window_ms: 2000,
            wardrobe_reconcile_interval_ticks: 100,
            tick_rate_hz: 60,
        }
    }
}

impl NetworkTuning {
    /// Bound on the TCP connect
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Bound on waiting for the handshake reply
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Bound on the socket becoming writable after connect
    pub fn writable_timeout(&self) -> Duration {
        Duration::from_millis(self.writable_timeout_ms)
    }

    /// Time one send phase may spend flushing before it resumes next iteration
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Poll interval while waiting to write
    pub fn send_wait(&self) -> Duration {
        Duration::from_millis(self.send_wait_ms)
    }

    /// Poll interval while waiting for relay data
    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    /// Pause between I/O loop iterations
    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    /// Mailbox lock wait on the I/O side
    pub fn io_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.io_lock_timeout_ms)
    }

    /// Mailbox lock wait on the tick side
    pub fn tick_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_lock_timeout_ms)
    }

    /// Wait for the I/O thread to exit before detaching it
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Age at which an unanswered request is given up
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Interval between telemetry snapshots
    pub fn telemetry_window(&self) -> Duration {
        Duration::from_millis(self.telemetry_window_ms)
    }

    /// Period of the host tick driving the client
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    fn validate(&self) -> SyncResult<()> {
        let positive = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("writable_timeout_ms", self.writable_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("telemetry_window_ms", self.telemetry_window_ms),
            ("max_in_flight", self.max_in_flight as u64),
            ("response_timeout_ms", self.response_timeout_ms),
            ("max_partial_frame", self.max_partial_frame as u64),
            ("wardrobe_reconcile_interval_ticks", u64::from(self.wardrobe_reconcile_interval_ticks)),
            ("tick_rate_hz", u64::from(self.tick_rate_hz)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SyncError::Config {
                    reason: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Target toggles
// =============================================================================

/// Per-target "updateable" switches keyed by long target name
///
/// Targets without an entry fall back to the table default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetToggles {
    overrides: BTreeMap<String, bool>,
}

impl TargetToggles {
    /// Check if `target` is published, falling back to its default
    pub fn is_updateable(&self, target: TargetName) -> bool {
        self.overrides
            .get(target.long_name())
            .copied()
            .unwrap_or_else(|| target.default_updateable())
    }

    /// Override one target's switch
    pub fn set(&mut self, target: TargetName, updateable: bool) {
        self.overrides.insert(target.long_name().to_string(), updateable);
    }

    /// Check or uncheck every target at once
    pub fn set_all(&mut self, updateable: bool) {
        for target in TargetName::all() {
            self.set(target, updateable);
        }
    }

    /// Drop every override
    pub fn restore_defaults(&mut self) {
        self.overrides.clear();
    }

    fn validate(&self) -> SyncResult<()> {
        match self
            .overrides
            .keys()
            .find(|name| TargetName::from_long(name).is_err())
        {
            Some(name) => Err(SyncError::Config {
                reason: format!("unknown target '{}'", name),
            }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Sync settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub server_host: String,
    pub server_port: u16,
    /// Avatar this client publishes; every other avatar is remote
    pub local_avatar: Option<String>,
    pub scene_id: String,
    pub update_frequency_hz: u32,
    pub spectator_mode: bool,
    pub update_positions: bool,
    pub update_rotations: bool,
    /// Skip targets whose transform matches what was last sent
    pub send_only_changed: bool,
    pub targets: TargetToggles,
    pub network: NetworkTuning,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8888,
            local_avatar: None,
            scene_id: String::new(),
            update_frequency_hz: UPDATE_FREQUENCY_CHOICES[5],
            spectator_mode: false,
            update_positions: true,
            update_rotations: true,
            send_only_changed: false,
            targets: TargetToggles::default(),
            network: NetworkTuning::default(),
        }
    }
}

impl SyncSettings {
    /// Minimum time between two requests
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.update_frequency_hz.max(1)))
    }

    /// Reject settings the client cannot run with
    ///
    /// Loading never validates; callers check before connecting.
    pub fn validate(&self) -> SyncResult<()> {
        if self.server_host.trim().is_empty() {
            return Err(SyncError::Config {
                reason: "server_host is empty".to_string(),
            });
        }
        if self.server_port == 0 {
            return Err(SyncError::Config {
                reason: "server_port must be non-zero".to_string(),
            });
        }
        if self.update_frequency_hz == 0 || self.update_frequency_hz > MAX_UPDATE_FREQUENCY_HZ {
            return Err(SyncError::Config {
                reason: format!(
                    "update_frequency_hz must be in 1..={}, got {}",
                    MAX_UPDATE_FREQUENCY_HZ, self.update_frequency_hz
                ),
            });
        }
        if let Some(local) = &self.local_avatar {
            if !crate::networking::protocol::codec::is_wire_safe(local) {
                return Err(SyncError::Config {
                    reason: format!("local_avatar '{}' cannot be sent on the wire", local),
                });
            }
        }
        self.targets.validate()?;
        self.network.validate()
    }
}

// Settings file management
fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "avatar-sync", "avatar-sync")
        .map(|proj| proj.config_dir().join(CONFIG_FILE))
}

/// Write settings as TOML, creating parent directories
pub fn save_settings_to(settings: &SyncSettings, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let toml = toml::to_string_pretty(settings)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, toml)
}

/// Read settings from `path`
///
/// A missing or unreadable file yields `None`. Missing keys keep their defaults.
pub fn load_settings_from(path: &Path) -> Option<SyncSettings> {
    let data = fs::read_to_string(path).ok()?;
    match toml::from_str::<SyncSettings>(&data) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!("Ignoring unreadable settings at {}: {}", path.display(), e);
            None
        }
    }
}

/// Save to the per-user config directory
pub fn save_settings(settings: &SyncSettings) -> io::Result<()> {
    match config_path() {
        Some(path) => save_settings_to(settings, &path),
        None => Ok(()),
    }
}

/// Load from the per-user config directory
pub fn load_settings() -> Option<SyncSettings> {
    config_path().and_then(|path| load_settings_from(&path))
}
