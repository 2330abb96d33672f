pub mod avatar;
pub mod events;
pub mod host;
pub mod request_builder;
pub mod response_applier;
pub mod roster;
pub mod scene;
pub mod wardrobe;

pub use avatar::{Avatar, Target, WardrobeState};
pub use events::{ChannelNotifier, SyncEvent, SyncEventKind};
pub use host::{AvatarDescriptor, SceneHost, SyncNotifier, TargetDescriptor};
pub use request_builder::build_request;
pub use response_applier::{ApplyReport, ResponseApplier};
pub use roster::{OnlineRoster, RosterChange};
pub use scene::InMemoryScene;
pub use wardrobe::{ClothingDiffTracker, OutboundClothesFilter, WardrobeDiff};
