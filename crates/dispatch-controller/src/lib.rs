//! Dispatch Controller (DC) Service Library
//!
//! Core functionality for the dispatch coordination engine - a stateful
//! WebSocket server arbitrating push-to-talk voice channels for field
//! units and dispatchers:
//!
//! - Exclusive transmission tokens, granted or denied atomically per channel
//! - Low-latency audio frame relay from the token holder to channel listeners
//! - Emergency alert lifecycle with forward-only state transitions
//! - Append-only transmission history with an asynchronous transcription
//!   adapter off the live audio path
//! - Session resumption across transport loss within a grace window
//!
//! # Architecture
//!
//! The DC uses an actor model hierarchy:
//!
//! ```text
//! DispatchActor (singleton per DC instance)
//! ├── owns the session registry
//! └── supervises N ChannelActors (one per catalog channel)
//!     └── ChannelActor: membership, transmission arbiter, audio relay
//! ```
//!
//! # Key Design Decisions
//!
//! - **Grant-or-busy, no queueing**: a busy channel denies immediately;
//!   contention resolves by humans re-pressing, not by a server queue
//! - **One total order per channel**: the channel actor stamps a single
//!   sequence over audio frames and control broadcasts
//! - **Non-blocking fan-out**: a slow listener loses events rather than
//!   delaying the channel
//! - **Sessions survive transports**: reconnects within the grace window
//!   resume identity and subscriptions
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`alerts`] - Emergency alert state machine
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`history`] - Append-only transmission history store
//! - [`transcription`] - Background transcription adapter
//! - [`transport`] - WebSocket connection handling
//! - [`routes`] / [`handlers`] - HTTP API
//! - [`resilience`] - Connection state machine and reconnect backoff

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod alerts;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod observability;
pub mod resilience;
pub mod routes;
pub mod transcription;
pub mod transport;
