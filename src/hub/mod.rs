//! Pub/sub fan-out for one upstream stream
//!
//! The [`BroadcastHub`] owns the chunker lifecycle and the subscriber set;
//! [`HubHandle`] is what client request handlers use to join and leave.

mod broadcast;
mod frame;
mod subscriber;

pub use broadcast::BroadcastHub;
pub use frame::Frame;
pub use subscriber::{HubHandle, Subscription};
