//! Subscriber handles for the broadcast hub
//!
//! A subscriber's identity is its channel (the token), never its address:
//! two clients behind the same NAT share an address but get independent
//! delivery channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use super::frame::Frame;

/// Per-subscriber channel capacity. One in-flight frame; anything beyond
/// that is dropped for that subscriber rather than queued.
const SUBSCRIBER_CAPACITY: usize = 1;

/// Events consumed by the hub loop
#[derive(Debug)]
pub(crate) enum HubEvent {
    Subscribe(Subscriber),
    Unsubscribe(u64),
}

/// Hub-side view of one downstream client
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) remote_addr: String,
    pub(crate) token: u64,
    pub(crate) sender: mpsc::Sender<Frame>,
}

/// Cheap clonable handle for subscribing to a hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    pub(crate) control: mpsc::UnboundedSender<HubEvent>,
    pub(crate) next_token: Arc<AtomicU64>,
}

impl HubHandle {
    /// Register a new subscriber and return its receiving end.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes, so every exit
    /// path of a client task detaches it from the hub.
    pub fn subscribe(&self, remote_addr: impl Into<String>) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        let _ = self.control.send(HubEvent::Subscribe(Subscriber {
            remote_addr: remote_addr.into(),
            token,
            sender,
        }));

        Subscription {
            rx,
            token,
            control: self.control.clone(),
        }
    }
}

/// Client-side end of a subscription
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Frame>,
    token: u64,
    control: mpsc::UnboundedSender<HubEvent>,
}

impl Subscription {
    /// Next frame; `None` once the hub has closed delivery.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Hub may already be gone; nothing to do then
        let _ = self.control.send(HubEvent::Unsubscribe(self.token));
    }
}
