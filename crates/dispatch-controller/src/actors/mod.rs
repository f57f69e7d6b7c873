//! Actor model implementation.
//!
//! Hierarchy:
//!
//! ```text
//! DispatchActor (singleton per instance)
//! ├── owns the session registry (single-writer, no locks)
//! └── supervises N ChannelActors (one per catalog channel)
//!     └── ChannelActor: membership, transmission arbiter, audio relay
//! ```
//!
//! Cancellation propagates parent-to-child via `CancellationToken` child
//! tokens. Each actor's mailbox is its mutual-exclusion point; per-channel
//! state is only ever touched by the owning `ChannelActor`.

pub mod channel;
pub mod dispatch;
pub mod messages;
pub mod sessions;

pub use channel::{ChannelActor, ChannelActorHandle};
pub use dispatch::{DispatchActor, DispatchActorHandle, DispatchStats};
pub use messages::{ChannelEvent, Outbound, OutboundSender};
pub use sessions::SessionRegistry;
