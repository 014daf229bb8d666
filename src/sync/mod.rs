// src/sync/mod.rs

// Declare sub-modules of the realtime synchronization layer
pub mod channel;
pub mod gate;
pub mod status;
pub mod store;

// Re-export the types consumers wire together at session start
pub use channel::{ChannelPhase, ConnectionChannel, ReconnectPolicy, Subscription};
pub use gate::{RefreshConfig, RefreshGate};
pub use status::StatusSnapshot;
pub use store::{StoreView, SyncStore};
