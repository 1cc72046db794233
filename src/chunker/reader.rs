//! Upstream stream reader ("chunker")
//!
//! Owns the single connection to the source camera: authenticates, checks
//! the multipart content type, and decodes the body into [`Frame`]s pushed
//! into the hub's intake channel.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::digest;
use crate::error::{ConfigError, ConnectError, Error, ProtocolError, Result};
use crate::hub::Frame;

use super::body::BodyReader;
use super::multipart::{PartDecoder, WireFormat};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream credential handling, fixed at construction
#[derive(Debug, Clone, Default)]
pub enum AuthMode {
    /// No credentials
    #[default]
    None,
    /// Preemptive HTTP Basic auth
    Basic { username: String, password: String },
    /// RFC 2617 Digest challenge-response
    Digest { username: String, password: String },
}

/// A connected response waiting for its read loop
struct Connected {
    response: Response,
    boundary: String,
}

/// Reads one upstream MJPEG stream and emits frames
///
/// Lifecycle: [`Chunker::new`] → [`Chunker::connect`] → [`Chunker::start`]
/// → [`Chunker::stop`]. The hub drives all of it from its event loop.
pub struct Chunker {
    id: String,
    source: Url,
    auth: AuthMode,
    format: WireFormat,
    rate: Option<f64>,
    client: Client,
    connected: Option<Connected>,
    headers: Option<HeaderMap>,
    stop_tx: Option<watch::Sender<()>>,
}

impl Chunker {
    /// Create a chunker for a source URI.
    ///
    /// The URI must be absolute http(s); anything else is rejected here,
    /// before any network activity.
    pub fn new(
        id: impl Into<String>,
        source: &str,
        auth: AuthMode,
        format: WireFormat,
        rate: Option<f64>,
    ) -> Result<Self> {
        let url =
            Url::parse(source).map_err(|_| ConfigError::InvalidSource(source.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidSource(source.to_string()).into());
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ConnectError::Request)?;

        Ok(Self {
            id: id.into(),
            source: url,
            auth,
            format,
            rate,
            client,
            connected: None,
            headers: None,
            stop_tx: None,
        })
    }

    /// Establish the upstream connection and negotiate the boundary.
    pub async fn connect(&mut self) -> Result<()> {
        tracing::info!(source = %self.id, url = %self.source, "connecting upstream");

        let mut request = self.client.get(self.source.clone());
        if let AuthMode::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        let mut response = request.send().await.map_err(ConnectError::Request)?;

        if let AuthMode::Digest { username, password } = &self.auth {
            let www_authenticate = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            if digest::digest_requested(response.status(), www_authenticate.as_deref()) {
                let challenge =
                    digest::parse_challenge(www_authenticate.as_deref().unwrap_or_default())?;
                let uri = request_uri(&self.source);
                let authorization =
                    digest::authorization(&challenge, username, password, "GET", &uri);

                // Discard the challenge body and retry exactly once
                drop(response);
                response = self
                    .client
                    .get(self.source.clone())
                    .header(AUTHORIZATION, format!("Digest {}", authorization))
                    .send()
                    .await
                    .map_err(ConnectError::Request)?;
            }
        }

        if response.status() != StatusCode::OK {
            return Err(ConnectError::Status(response.status()).into());
        }

        let boundary = boundary_param(response.headers())?;
        let (stop_tx, _) = watch::channel(());

        self.headers = Some(response.headers().clone());
        self.connected = Some(Connected { response, boundary });
        self.stop_tx = Some(stop_tx);

        tracing::debug!(source = %self.id, boundary = %boundary_of(&self.connected), "upstream connected");
        Ok(())
    }

    /// Headers of the upstream response, available after a successful
    /// connect.
    pub fn response_headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Spawn the read loop, delivering frames into `sink`.
    ///
    /// The sink is dropped when the loop ends for any reason, which is how
    /// the hub learns the stream is over.
    pub fn start(&mut self, sink: mpsc::Sender<Frame>) -> JoinHandle<()> {
        let connected = self
            .connected
            .take()
            .expect("chunker started before connect");
        let stop_rx = self
            .stop_tx
            .as_ref()
            .expect("chunker started before connect")
            .subscribe();

        let decoder = PartDecoder::new(
            BodyReader::from_response(connected.response),
            connected.boundary,
            self.format,
        );

        tokio::spawn(run_loop(self.id.clone(), decoder, sink, stop_rx, self.rate))
    }

    /// Request the read loop to exit at its next checkpoint. Non-blocking.
    ///
    /// Calling this twice, or before a successful connect, is a programming
    /// error.
    pub fn stop(&mut self) {
        tracing::info!(source = %self.id, "stopping chunker");
        let stop_tx = self.stop_tx.take().expect("chunker stop invoked twice");
        drop(stop_tx);
    }

    /// True from a successful connect until [`Chunker::stop`] fires.
    pub fn started(&self) -> bool {
        self.stop_tx.is_some()
    }
}

fn boundary_of(connected: &Option<Connected>) -> &str {
    connected.as_ref().map(|c| c.boundary.as_str()).unwrap_or("")
}

/// Path plus query of the source URL, as sent on the request line
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Extract the boundary parameter from the response Content-Type.
///
/// Required in both wire formats; even devices with broken part delimiters
/// advertise a boundary here.
fn boundary_param(headers: &HeaderMap) -> Result<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or_default().trim();
    if !media_type.starts_with("multipart/") {
        return Err(ProtocolError::NotMultipart(content_type.to_string()).into());
    }

    for param in parts {
        if let Some((name, value)) = param.trim().split_once('=') {
            if name.trim().eq_ignore_ascii_case("boundary") {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    Err(ProtocolError::MissingBoundary(content_type.to_string()).into())
}

async fn run_loop(
    id: String,
    mut parts: PartDecoder,
    sink: mpsc::Sender<Frame>,
    mut stop_rx: watch::Receiver<()>,
    rate: Option<f64>,
) {
    tracing::info!(source = %id, "chunker started");

    let mut ticker = rate.filter(|r| *r > 0.0).map(|r| {
        let period = Duration::from_secs_f64(1.0 / r);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    let mut first_frame = true;
    let failure = loop {
        // Stop checkpoint: the sender side is dropped by stop()
        if stop_rx.has_changed().is_err() {
            break None;
        }

        let data = match parts.next_part().await {
            Ok(Some(data)) => data,
            Ok(None) => break None,
            Err(e) => break Some(e),
        };

        // The first frame always goes out; afterwards frames only pass
        // when the rate tick has fired since the last delivery.
        if !first_frame {
            if let Some(ticker) = ticker.as_mut() {
                if !tick_fired(ticker).await {
                    tracing::debug!(source = %id, "frame skipped by rate limit");
                    continue;
                }
            }
        }
        first_frame = false;

        tokio::select! {
            sent = sink.send(Frame::new(data)) => {
                if sent.is_err() {
                    break None;
                }
            }
            _ = stop_rx.changed() => break None,
        }
    };

    match failure {
        Some(e) => tracing::warn!(source = %id, error = %e, "chunker failed"),
        None => tracing::info!(source = %id, "chunker stopped"),
    }
    // Dropping the sink here closes the hub intake; dropping the decoder
    // closes the upstream connection.
}

/// Non-blocking probe of the rate ticker.
async fn tick_fired(ticker: &mut tokio::time::Interval) -> bool {
    std::future::poll_fn(|cx| std::task::Poll::Ready(ticker.poll_tick(cx).is_ready())).await
}
