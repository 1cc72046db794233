//! MJPEG stream relay
//!
//! Connects to upstream MJPEG cameras over HTTP, decodes their
//! `multipart/x-mixed-replace` framing, and republishes each stream to any
//! number of downstream HTTP clients from a single upstream connection.
//!
//! # Architecture
//!
//! ```text
//!    [Camera] ──HTTP──► Chunker ──mpsc(1)──► BroadcastHub
//!                       (decode parts)            │
//!                                   ┌─────────────┼─────────────┐
//!                                   │             │             │
//!                                   ▼             ▼             ▼
//!                             Subscription  Subscription  Subscription
//!                                   │             │             │
//!                               PartStream    PartStream    PartStream
//!                                   │             │             │
//!                                   ▼             ▼             ▼
//!                               [Client]      [Client]      [Client]
//! ```
//!
//! The hub connects upstream lazily when the first client arrives and
//! disconnects after a grace period once the last client leaves. Frames are
//! `bytes::Bytes`, so fan-out is reference-counted rather than copied; a
//! slow client drops frames instead of stalling the rest.

pub mod auth;
pub mod chunker;
pub mod config;
pub mod error;
pub mod hub;
pub mod server;

#[cfg(test)]
mod testing;

pub use chunker::{AuthMode, Chunker, WireFormat};
pub use config::SourceConfig;
pub use error::{Error, Result};
pub use hub::{BroadcastHub, HubHandle, Subscription};
pub use server::ServerConfig;
