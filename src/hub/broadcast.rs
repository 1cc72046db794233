//! Broadcast hub: fan-out coordinator and chunker lifecycle manager
//!
//! A single task owns all hub state and serializes every event — frame
//! arrival, subscribe, unsubscribe, idle-timer expiry — through one select
//! point. No other code touches the subscriber set or the chunker, so no
//! locking is needed anywhere.
//!
//! ```text
//!   Chunker ──frames──► BroadcastHub ──try_send──► Subscription ──► client
//!                            ▲                 └─► Subscription ──► client
//!                 subscribe/unsubscribe
//! ```
//!
//! The chunker is started lazily when the first subscriber arrives and
//! stopped only after the subscriber set has stayed empty for the idle
//! grace duration, so a client that reconnects quickly reuses the live
//! upstream connection.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::chunker::Chunker;
use crate::error::Result;

use super::frame::Frame;
use super::subscriber::{HubEvent, HubHandle, Subscriber};

/// What woke the hub loop
enum Wake {
    Control(Option<HubEvent>),
    Frame(Option<Frame>),
    IdleExpired,
}

/// Fan-out coordinator for one upstream source
pub struct BroadcastHub {
    id: String,
    chunker: Chunker,
    idle_grace: Duration,
    control_tx: Option<mpsc::UnboundedSender<HubEvent>>,
    control_rx: mpsc::UnboundedReceiver<HubEvent>,
    intake: Option<mpsc::Receiver<Frame>>,
    subscribers: HashMap<u64, Subscriber>,
    idle: Option<Pin<Box<Sleep>>>,
    next_token: Arc<AtomicU64>,
}

impl BroadcastHub {
    /// Create a hub owning `chunker`. Nothing connects until the first
    /// subscriber shows up.
    pub fn new(id: impl Into<String>, chunker: Chunker, idle_grace: Duration) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            id: id.into(),
            chunker,
            idle_grace,
            control_tx: Some(control_tx),
            control_rx,
            intake: None,
            subscribers: HashMap::new(),
            idle: None,
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Handle for subscribing; clone freely.
    pub fn handle(&self) -> HubHandle {
        HubHandle {
            control: self
                .control_tx
                .clone()
                .expect("hub handle requested after start"),
            next_token: Arc::clone(&self.next_token),
        }
    }

    /// Spawn the event loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        // Only outstanding handles keep the loop alive
        self.control_tx = None;

        loop {
            match self.next_wake().await {
                Wake::Frame(Some(frame)) => self.publish(frame),
                Wake::Frame(None) => {
                    // Upstream ended or failed; both look the same here
                    self.stop_chunker();
                    self.close_subscribers();
                }
                Wake::Control(Some(HubEvent::Subscribe(sub))) => self.handle_subscribe(sub).await,
                Wake::Control(Some(HubEvent::Unsubscribe(token))) => {
                    self.handle_unsubscribe(token)
                }
                Wake::Control(None) => {
                    self.stop_chunker();
                    break;
                }
                Wake::IdleExpired => {
                    self.idle = None;
                    if self.subscribers.is_empty() {
                        self.stop_chunker();
                    }
                }
            }
        }

        tracing::debug!(source = %self.id, "hub loop exited");
    }

    /// The loop's single suspension point.
    async fn next_wake(&mut self) -> Wake {
        let Self {
            control_rx,
            intake,
            idle,
            ..
        } = self;

        tokio::select! {
            event = control_rx.recv() => Wake::Control(event),
            frame = recv_or_pending(intake) => Wake::Frame(frame),
            _ = sleep_or_pending(idle) => Wake::IdleExpired,
        }
    }

    /// Best-effort fan-out: a subscriber whose channel is full loses this
    /// one frame; nothing queues and the source never sees backpressure.
    fn publish(&mut self, frame: Frame) {
        for sub in self.subscribers.values() {
            match sub.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(
                        source = %self.id,
                        client = %sub.remote_addr,
                        "frame dropped for slow subscriber"
                    );
                }
                // Subscriber is going away; its unsubscribe is in flight
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    async fn handle_subscribe(&mut self, sub: Subscriber) {
        let addr = sub.remote_addr.clone();
        self.subscribers.insert(sub.token, sub);

        tracing::info!(
            source = %self.id,
            client = %addr,
            subscribers = self.subscribers.len(),
            "subscriber added"
        );

        if self.subscribers.len() == 1 {
            if let Err(e) = self.start_chunker().await {
                tracing::error!(source = %self.id, error = %e, "failed to start chunker");
                self.close_subscribers();
            }
        }
    }

    fn handle_unsubscribe(&mut self, token: u64) {
        if let Some(sub) = self.subscribers.remove(&token) {
            tracing::info!(
                source = %self.id,
                client = %sub.remote_addr,
                subscribers = self.subscribers.len(),
                "subscriber removed"
            );
        }

        if self.subscribers.is_empty() {
            // Rearming replaces (and thereby cancels) any pending timer
            self.idle = Some(Box::pin(tokio::time::sleep(self.idle_grace)));
        }
    }

    async fn start_chunker(&mut self) -> Result<()> {
        // Still running from inside the grace window; the stop guard also
        // covers a subscribe racing a not-yet-exited read loop.
        if self.chunker.started() {
            return Ok(());
        }

        self.chunker.connect().await?;

        let (tx, rx) = mpsc::channel(1);
        self.chunker.start(tx);
        self.intake = Some(rx);
        Ok(())
    }

    fn stop_chunker(&mut self) {
        if self.intake.take().is_some() {
            self.chunker.stop();
        }
    }

    fn close_subscribers(&mut self) {
        if !self.subscribers.is_empty() {
            tracing::info!(
                source = %self.id,
                subscribers = self.subscribers.len(),
                "closing subscriber channels"
            );
        }
        // Dropping the senders is the close; each receiver sees it once
        self.subscribers.clear();
    }
}

async fn recv_or_pending(intake: &mut Option<mpsc::Receiver<Frame>>) -> Option<Frame> {
    match intake {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_or_pending(idle: &mut Option<Pin<Box<Sleep>>>) {
    match idle {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{AuthMode, WireFormat};
    use crate::testing::{spawn_fixture, FixtureBehavior};
    use bytes::Bytes;

    fn test_chunker(source: &str) -> Chunker {
        Chunker::new("test", source, AuthMode::None, WireFormat::Multipart, None).unwrap()
    }

    fn offline_hub(grace: Duration) -> BroadcastHub {
        // Points at a reserved port; tests below never connect it
        BroadcastHub::new("test", test_chunker("http://127.0.0.1:9/"), grace)
    }

    fn frame(byte: u8) -> Frame {
        Frame::new(Bytes::from(vec![byte]))
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let mut hub = offline_hub(Duration::from_secs(60));

        let (normal_tx, mut normal_rx) = mpsc::channel(1);
        hub.subscribers.insert(
            1,
            Subscriber {
                remote_addr: "10.0.0.1:1000".into(),
                token: 1,
                sender: normal_tx,
            },
        );
        let (stalled_tx, mut stalled_rx) = mpsc::channel(1);
        hub.subscribers.insert(
            2,
            Subscriber {
                remote_addr: "10.0.0.2:2000".into(),
                token: 2,
                sender: stalled_tx,
            },
        );

        // The stalled subscriber never drains; the normal one gets every
        // frame, in order
        for i in 0..5u8 {
            hub.publish(frame(i));
            assert_eq!(normal_rx.recv().await.unwrap().data()[0], i);
        }

        // The stalled channel buffered the first frame and dropped the rest
        assert_eq!(stalled_rx.try_recv().unwrap().data()[0], 0);
        assert!(stalled_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_subscribers_ends_channels() {
        let mut hub = offline_hub(Duration::from_secs(60));

        let (tx, mut rx) = mpsc::channel(1);
        hub.subscribers.insert(
            1,
            Subscriber {
                remote_addr: "10.0.0.1:1000".into(),
                token: 1,
                sender: tx,
            },
        );

        hub.close_subscribers();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_closes_all_subscribers() {
        // Port 9 (discard) is not listening; connect fails fast
        let hub = offline_hub(Duration::from_secs(60));
        let handle = hub.handle();
        hub.start();

        let mut sub = handle.subscribe("10.0.0.1:1000");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lazy_connect_and_grace_window() {
        let fixture = spawn_fixture(FixtureBehavior::Stream).await;
        let chunker = test_chunker(&format!("http://{}/video.mjpg", fixture.addr));
        let hub = BroadcastHub::new("cam", chunker, Duration::from_millis(100));
        let handle = hub.handle();
        hub.start();

        // No subscribers yet, no connection yet
        assert_eq!(fixture.connections(), 0);

        let mut sub = handle.subscribe("10.0.0.1:1000");
        assert!(sub.recv().await.is_some());
        assert_eq!(fixture.connections(), 1);
        drop(sub);

        // Back before the grace expires: same upstream connection
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut sub = handle.subscribe("10.0.0.1:1001");
        assert!(sub.recv().await.is_some());
        assert_eq!(fixture.connections(), 1);
        drop(sub);

        // Grace elapses with nobody around: the chunker stops, and the
        // next subscriber triggers a fresh connect
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut sub = handle.subscribe("10.0.0.1:1002");
        assert!(sub.recv().await.is_some());
        assert_eq!(fixture.connections(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_after_upstream_failure() {
        let fixture = spawn_fixture(FixtureBehavior::StreamThenClose).await;
        let chunker = test_chunker(&format!("http://{}/video.mjpg", fixture.addr));
        let hub = BroadcastHub::new("cam", chunker, Duration::from_secs(60));
        let handle = hub.handle();
        hub.start();

        // Upstream dies after its only frame: delivery ends for the
        // current subscriber
        let mut sub = handle.subscribe("10.0.0.1:1000");
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        drop(sub);

        // No mid-stream reconnect happened behind the scenes
        assert_eq!(fixture.connections(), 1);

        // A fresh subscribe opens a new upstream connection
        let mut sub = handle.subscribe("10.0.0.1:1001");
        assert!(sub.recv().await.is_some());
        assert_eq!(fixture.connections(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_share_one_connection() {
        let fixture = spawn_fixture(FixtureBehavior::Stream).await;
        let chunker = test_chunker(&format!("http://{}/video.mjpg", fixture.addr));
        let hub = BroadcastHub::new("cam", chunker, Duration::from_secs(60));
        let handle = hub.handle();
        hub.start();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let mut sub = handle.subscribe(format!("10.0.0.1:{}", 1000 + i));
                sub.recv().await.is_some()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(fixture.connections(), 1);
    }

    #[tokio::test]
    async fn test_all_handles_dropped_stops_loop() {
        let fixture = spawn_fixture(FixtureBehavior::Stream).await;
        let chunker = test_chunker(&format!("http://{}/video.mjpg", fixture.addr));
        let hub = BroadcastHub::new("cam", chunker, Duration::from_secs(60));
        let handle = hub.handle();
        let loop_task = hub.start();

        let mut sub = handle.subscribe("10.0.0.1:1000");
        assert!(sub.recv().await.is_some());

        drop(sub);
        drop(handle);
        loop_task.await.unwrap();
    }
}
