//! Streaming client for a realtime database that pushes changes as
//! server-sent events (`put`, `patch`, `keep-alive`, `cancel`, `auth_revoked`).
//!
//! Updates are parsed at this boundary and queued as [`StreamEvent`]s for the
//! synchronization engine. The worker reconnects by itself after idle
//! timeouts and dropped connections.

use crate::config::RemoteConfig;
use crate::hardware::LinkStatus;
use crate::notification::{parse_update, UpdateShape};
use crate::state_sync::{RemoteStateStore, StreamEvent};
use serde_derive::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest undelimited event kept before the decoder drops it.
const MAX_EVENT_BYTES: usize = 64 * 1024;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Splits a byte stream into server-sent events. Events may straddle chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        if self.buffer.len() > MAX_EVENT_BYTES {
            warn!(
                "Dropping {} bytes of stream data without an event boundary",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::new();
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_empty() && data.is_empty() {
        return None;
    }
    if event.is_empty() {
        event = "message".to_string();
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[derive(Debug, Deserialize)]
struct RtdbUpdate {
    path: String,
    data: Value,
}

/// What to do after handling one event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect(String),
    QueueClosed,
}

/// Why reading a stream stopped.
#[derive(Debug)]
enum StreamEnd {
    IdleTimeout,
    Closed(String),
    QueueClosed,
}

pub struct RtdbStreamClient {
    database_url: String,
    auth_token: String,
    idle_timeout: Duration,
    client: reqwest::Client,
    events: Sender<StreamEvent>,
    link: LinkStatus,
    worker: Option<JoinHandle<()>>,
}

impl RtdbStreamClient {
    pub fn new(
        config: &RemoteConfig,
        events: Sender<StreamEvent>,
        link: LinkStatus,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            database_url: config.database_url.clone(),
            auth_token: config.auth_token.clone(),
            idle_timeout: config.idle_timeout(),
            client,
            events,
            link,
            worker: None,
        })
    }

    fn stream_url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.database_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }
}

impl RemoteStateStore for RtdbStreamClient {
    async fn begin_stream(&mut self, path: &str) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("No database URL configured");
        }

        let url = self.stream_url(path);
        let response = match open_stream(&self.client, &url, &self.auth_token, self.idle_timeout)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.link.set_connected(false);
                return Err(e);
            }
        };
        self.link.set_connected(true);

        if let Some(previous) = self.worker.take() {
            previous.abort();
        }
        let worker = StreamWorker {
            client: self.client.clone(),
            url,
            auth_token: self.auth_token.clone(),
            idle_timeout: self.idle_timeout,
            events: self.events.clone(),
            link: self.link.clone(),
        };
        self.worker = Some(tokio::spawn(worker.run(response)));
        Ok(())
    }
}

impl Drop for RtdbStreamClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

/// Sends the stream request and waits for the response headers, giving up
/// after `answer_timeout`.
async fn open_stream(
    client: &reqwest::Client,
    url: &str,
    auth_token: &str,
    answer_timeout: Duration,
) -> anyhow::Result<reqwest::Response> {
    let mut request = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if !auth_token.is_empty() {
        request = request.query(&[("auth", auth_token)]);
    }
    let response = timeout(answer_timeout, request.send())
        .await
        .map_err(|_| anyhow::anyhow!("Stream request not answered within {answer_timeout:?}"))??;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Stream request answered {status}");
    }
    Ok(response)
}

/// Owns one stream connection at a time and keeps it alive.
struct StreamWorker {
    client: reqwest::Client,
    url: String,
    auth_token: String,
    idle_timeout: Duration,
    events: Sender<StreamEvent>,
    link: LinkStatus,
}

impl StreamWorker {
    async fn run(self, first: reqwest::Response) {
        let mut pending = Some(first);
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let response = match pending.take() {
                Some(response) => response,
                None => match open_stream(
                    &self.client,
                    &self.url,
                    &self.auth_token,
                    self.idle_timeout,
                )
                .await
                {
                    Ok(response) => {
                        info!("Stream reconnected to {}", self.url);
                        self.link.set_connected(true);
                        backoff = INITIAL_BACKOFF;
                        response
                    }
                    Err(e) => {
                        warn!("Stream reconnect failed: {e:#}, retrying in {backoff:?}");
                        self.link.set_connected(false);
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                },
            };

            match self.read(response).await {
                StreamEnd::QueueClosed => {
                    debug!("Notification queue closed, stopping stream worker");
                    return;
                }
                StreamEnd::IdleTimeout => {
                    if self.events.send(StreamEvent::Timeout).await.is_err() {
                        return;
                    }
                }
                StreamEnd::Closed(reason) => {
                    warn!("Stream closed: {reason}, reconnecting in {backoff:?}");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn read(&self, mut response: reqwest::Response) -> StreamEnd {
        let mut decoder = SseDecoder::default();
        loop {
            let chunk = match timeout(self.idle_timeout, response.chunk()).await {
                Err(_) => return StreamEnd::IdleTimeout,
                Ok(Err(e)) => return StreamEnd::Closed(e.to_string()),
                Ok(Ok(None)) => return StreamEnd::Closed("server ended the stream".to_string()),
                Ok(Ok(Some(chunk))) => chunk,
            };

            for event in decoder.push(&chunk) {
                match self.dispatch(event).await {
                    Flow::Continue => {}
                    Flow::Reconnect(reason) => return StreamEnd::Closed(reason),
                    Flow::QueueClosed => return StreamEnd::QueueClosed,
                }
            }
        }
    }

    async fn dispatch(&self, event: SseEvent) -> Flow {
        let shape = match event.event.as_str() {
            "put" => UpdateShape::Put,
            "patch" => UpdateShape::Patch,
            "keep-alive" => return Flow::Continue,
            "cancel" => return Flow::Reconnect(format!("stream cancelled: {}", event.data)),
            "auth_revoked" => return Flow::Reconnect("credential revoked".to_string()),
            other => {
                debug!("Ignoring stream event `{other}`");
                return Flow::Continue;
            }
        };

        info!("STREAM DATA: {} {}", event.event, event.data);
        let update: RtdbUpdate = match serde_json::from_str(&event.data) {
            Ok(update) => update,
            Err(e) => {
                warn!("Discarding malformed {} event: {e}", event.event);
                return Flow::Continue;
            }
        };

        match parse_update(shape, &update.path, &update.data) {
            Ok(Some(notification)) => {
                if self
                    .events
                    .send(StreamEvent::Notification(notification))
                    .await
                    .is_err()
                {
                    return Flow::QueueClosed;
                }
            }
            Ok(None) => debug!("Update at {} carries no switch state", update.path),
            Err(e) => warn!("Discarding notification: {e}"),
        }
        Flow::Continue
    }
}
