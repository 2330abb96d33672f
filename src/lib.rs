// avatar-sync: real-time avatar state synchronization over a TCP relay

pub mod config;
pub mod networking;
pub mod utils;
pub mod world;

// Re-export commonly used types for convenience
pub use config::{NetworkTuning, SyncSettings, TargetToggles};
pub use networking::{ConnectionState, SyncClient, SyncError, SyncResult, TelemetrySnapshot};
pub use world::{InMemoryScene, SceneHost, SyncNotifier};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
