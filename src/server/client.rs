//! Per-client streaming response writer
//!
//! Each request subscribes to the hub, waits for a first frame, then
//! streams a `multipart/x-mixed-replace` body with one part per frame.
//! The boundary is generated per response and has nothing to do with the
//! upstream one.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{ClientError, Error};
use crate::hub::{Frame, HubHandle, Subscription};

/// Per-path state handed to the handler
pub(crate) struct StreamContext {
    pub hub: HubHandle,
    pub trusted_proxy: bool,
    pub client_header: Option<String>,
}

/// GET/HEAD handler streaming the relayed frames
pub(crate) async fn stream(
    State(ctx): State<Arc<StreamContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let client = client_address(
        &headers,
        peer,
        ctx.trusted_proxy,
        ctx.client_header.as_deref(),
    );

    let mut subscription = ctx.hub.subscribe(client.clone());

    // No status goes out until the stream proves itself with a frame
    let Some(first) = subscription.recv().await else {
        tracing::warn!(client = %client, "stream ended before first frame");
        return Error::Client(ClientError::StreamFailed).into_response();
    };

    tracing::debug!(client = %client, "streaming to client");

    let boundary = random_boundary();
    let content_type = format!("multipart/x-mixed-replace; boundary={}", boundary);
    let body = Body::from_stream(PartStream::new(subscription, boundary, first));

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Resolve the client address for logging and subscriber identity.
///
/// Proxy headers are only believed when trusted-proxy mode is on;
/// otherwise the transport peer address wins unconditionally.
fn client_address(
    headers: &HeaderMap,
    peer: SocketAddr,
    trusted_proxy: bool,
    client_header: Option<&str>,
) -> String {
    if trusted_proxy {
        let preferred = client_header.unwrap_or("X-Real-IP");
        for name in [preferred, "X-Forwarded-For"] {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                let first = value.split(',').next().unwrap_or_default().trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }

    peer.to_string()
}

fn random_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}

/// Body stream emitting one multipart part per received frame
struct PartStream {
    subscription: Subscription,
    boundary: String,
    pending: Option<Frame>,
    done: bool,
}

impl PartStream {
    fn new(subscription: Subscription, boundary: String, first: Frame) -> Self {
        Self {
            subscription,
            boundary,
            pending: Some(first),
            done: false,
        }
    }

    fn encode_part(&self, frame: &Frame) -> Bytes {
        let mut part = BytesMut::with_capacity(frame.len() + 128);
        part.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                self.boundary,
                frame.len()
            )
            .as_bytes(),
        );
        part.extend_from_slice(frame.data());
        part.extend_from_slice(b"\r\n");
        part.freeze()
    }

    fn closing_delimiter(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }
}

impl Stream for PartStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if let Some(frame) = this.pending.take() {
            return Poll::Ready(Some(Ok(this.encode_part(&frame))));
        }

        match this.subscription.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(this.encode_part(&frame)))),
            Poll::Ready(None) => {
                // Hub closed delivery; finish the multipart body properly
                this.done = true;
                Poll::Ready(Some(Ok(this.closing_delimiter())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.1:52100".parse().unwrap()
    }

    #[test]
    fn test_client_address_untrusted_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("10.1.1.1"));
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.2.2.2"));

        assert_eq!(
            client_address(&headers, peer(), false, None),
            "192.0.2.1:52100"
        );
    }

    #[test]
    fn test_client_address_trusted_prefers_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("10.1.1.1"));
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("10.2.2.2, 10.3.3.3"),
        );

        assert_eq!(client_address(&headers, peer(), true, None), "10.1.1.1");
    }

    #[test]
    fn test_client_address_trusted_falls_back_to_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("10.2.2.2, 10.3.3.3"),
        );

        assert_eq!(client_address(&headers, peer(), true, None), "10.2.2.2");
    }

    #[test]
    fn test_client_address_trusted_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert("CF-Connecting-IP", HeaderValue::from_static("10.9.9.9"));
        headers.insert("X-Real-IP", HeaderValue::from_static("10.1.1.1"));

        assert_eq!(
            client_address(&headers, peer(), true, Some("CF-Connecting-IP")),
            "10.9.9.9"
        );
    }

    #[test]
    fn test_client_address_trusted_empty_headers() {
        let headers = HeaderMap::new();

        assert_eq!(
            client_address(&headers, peer(), true, None),
            "192.0.2.1:52100"
        );
    }

    #[test]
    fn test_random_boundary_shape() {
        let a = random_boundary();
        let b = random_boundary();

        assert_eq!(a.len(), 30);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b); // fresh per response
    }

    #[test]
    fn test_encode_part() {
        let hub_unused = {
            // encode_part never touches the subscription, but the struct
            // needs one; wire up a dummy hub handle
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            HubHandle {
                control: tx,
                next_token: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            }
        };
        let subscription = hub_unused.subscribe("test");
        let stream = PartStream::new(
            subscription,
            "bnd".into(),
            Frame::new(Bytes::from_static(b"xx")),
        );

        let part = stream.encode_part(&Frame::new(Bytes::from_static(b"JPEG")));
        assert_eq!(
            part,
            "--bnd\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
        assert_eq!(stream.closing_delimiter(), "--bnd--\r\n");
    }
}
