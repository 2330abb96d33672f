pub mod settings;

pub use settings::{
    load_settings, load_settings_from, save_settings, save_settings_to, NetworkTuning, SyncSettings,
    TargetToggles, MAX_UPDATE_FREQUENCY_HZ, UPDATE_FREQUENCY_CHOICES,
};
