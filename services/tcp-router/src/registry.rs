//! Routing registry client.
//!
//! Endpoints consumed:
//! - `GET /routing/v1/tcp_routes` for the full mapping set (bulk sync)
//! - `GET /routing/v1/tcp_routes/events` as a server-sent event stream, one
//!   event per mapping change, named after its action
//! - `GET /routing/v1/router_groups` for the startup port check

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use tcp_routing_api::{ModelError, RouterGroup, TcpEvent, TcpRouteMapping};
use tracing::debug;

pub use crate::error::RegistryError;

const TCP_ROUTES_PATH: &str = "/routing/v1/tcp_routes";
const TCP_EVENTS_PATH: &str = "/routing/v1/tcp_routes/events";
const ROUTER_GROUPS_PATH: &str = "/routing/v1/router_groups";

/// Timeout for the bulk fetch. The event stream has none.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a pending event stream line or event body, in bytes.
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Source of TCP route mappings and their change events.
#[async_trait]
pub trait RouteRegistry: Send + Sync {
    /// Fetch every TCP route mapping.
    async fn tcp_route_mappings(&self, token: &str)
        -> Result<Vec<TcpRouteMapping>, RegistryError>;

    /// Open the TCP route event stream.
    async fn tcp_events(&self, token: &str) -> Result<TcpEventStream, RegistryError>;

    /// Fetch every router group.
    async fn router_groups(&self, token: &str) -> Result<Vec<RouterGroup>, RegistryError>;
}

/// HTTP client for the routing registry.
#[derive(Debug, Clone)]
pub struct RoutingApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl RoutingApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tcp-router/0.1.0")
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        if token.is_empty() {
            request
        } else {
            request.header(AUTHORIZATION, format!("Bearer {token}"))
        }
    }

    /// Fetch every TCP route mapping.
    pub async fn fetch_tcp_route_mappings(
        &self,
        token: &str,
    ) -> Result<Vec<TcpRouteMapping>, RegistryError> {
        let request = self
            .client
            .get(self.url(TCP_ROUTES_PATH))
            .timeout(FETCH_TIMEOUT);
        let response = check_status(self.authorized(request, token).send().await?).await?;

        let mappings: Vec<TcpRouteMapping> = response.json().await?;
        debug!(num_routes = mappings.len(), "fetched tcp route mappings");
        Ok(mappings)
    }

    /// Fetch every router group.
    pub async fn fetch_router_groups(&self, token: &str) -> Result<Vec<RouterGroup>, RegistryError> {
        let request = self
            .client
            .get(self.url(ROUTER_GROUPS_PATH))
            .timeout(FETCH_TIMEOUT);
        let response = check_status(self.authorized(request, token).send().await?).await?;

        let groups: Vec<RouterGroup> = response.json().await?;
        debug!(num_groups = groups.len(), "fetched router groups");
        Ok(groups)
    }

    /// Open the TCP route event stream.
    pub async fn subscribe_to_tcp_events(
        &self,
        token: &str,
    ) -> Result<TcpEventStream, RegistryError> {
        let request = self
            .client
            .get(self.url(TCP_EVENTS_PATH))
            .header(ACCEPT, "text/event-stream");
        let response = check_status(self.authorized(request, token).send().await?).await?;

        Ok(TcpEventStream::new(response.bytes_stream()))
    }
}

#[async_trait]
impl RouteRegistry for RoutingApiClient {
    async fn tcp_route_mappings(
        &self,
        token: &str,
    ) -> Result<Vec<TcpRouteMapping>, RegistryError> {
        self.fetch_tcp_route_mappings(token).await
    }

    async fn tcp_events(&self, token: &str) -> Result<TcpEventStream, RegistryError> {
        self.subscribe_to_tcp_events(token).await
    }

    async fn router_groups(&self, token: &str) -> Result<Vec<RouterGroup>, RegistryError> {
        self.fetch_router_groups(token).await
    }
}

async fn check_status(response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(RegistryError::Unauthorized);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decoded stream of [`TcpEvent`]s.
pub struct TcpEventStream {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
}

impl TcpEventStream {
    pub fn new(body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            body: Box::pin(body),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        }
    }

    /// Next event, or `None` once the server closes the stream.
    pub async fn next(&mut self) -> Result<Option<TcpEvent>, RegistryError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                debug!(id = ?frame.id, event = %frame.event, "received event");
                let event = TcpEvent::from_parts(&frame.event, &frame.data)?;
                return Ok(Some(event));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)?),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines (or UTF-8 sequences) anywhere; complete lines are
/// consumed and the remainder is kept for the next push. A partial line or
/// undispatched event larger than [`MAX_EVENT_SIZE`] is an error.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
}

impl SseDecoder {
    /// Feed bytes, returning every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, ModelError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_EVENT_SIZE || self.data_len > MAX_EVENT_SIZE {
            let pending = self.buffer.len().max(self.data_len);
            self.reset();
            return Err(ModelError::InvalidPayload(format!(
                "event stream entry exceeds {MAX_EVENT_SIZE} bytes ({pending} pending)"
            )));
        }

        Ok(frames)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        self.data_len = 0;
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // comment
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len();
                self.data.push(value.to_string());
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(SseFrame {
            id: self.id.clone(),
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
