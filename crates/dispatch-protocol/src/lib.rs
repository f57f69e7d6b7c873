//! Wire protocol for the Dispatch Console.
//!
//! This crate defines everything that crosses the client connection:
//! a compact binary format for opaque audio frames and the JSON control
//! message catalog (join/leave, PTT grant and release, emergency alerts,
//! heartbeats), plus the shared vocabulary types both sides agree on.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod frame;
pub mod messages;
pub mod types;
