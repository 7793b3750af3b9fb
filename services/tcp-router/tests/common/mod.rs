//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tcp_router::{Configurer, RegistryError, RouteRegistry, RoutingTable, TcpEventStream, TokenFetcher};
use tcp_routing_api::{ModificationTag, RouterGroup, TcpRouteMapping};
use tokio::sync::Notify;

pub fn mapping(port: u16, ip: &str, host_port: u16, guid: &str, index: u64) -> TcpRouteMapping {
    TcpRouteMapping::new("default-tcp", port, ip, host_port, 120)
        .with_modification_tag(ModificationTag::new(guid, index))
}

/// Records every table it is asked to apply.
#[derive(Default)]
pub struct FakeConfigurer {
    calls: Mutex<Vec<RoutingTable>>,
    fail: AtomicBool,
}

impl FakeConfigurer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_table(&self) -> Option<RoutingTable> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Configurer for FakeConfigurer {
    async fn configure(&self, table: &RoutingTable) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(table.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("haproxy reload failed");
        }
        Ok(())
    }
}

/// Registry with scripted responses.
///
/// Fetches pop queued results (an empty queue yields no mappings or router
/// groups). When gated, each mapping fetch signals `fetch_started` and then
/// waits for `release`.
#[derive(Default)]
pub struct FakeRegistry {
    responses: Mutex<VecDeque<Result<Vec<TcpRouteMapping>, RegistryError>>>,
    event_bodies: Mutex<VecDeque<Vec<&'static str>>>,
    router_groups: Mutex<VecDeque<Result<Vec<RouterGroup>, RegistryError>>>,
    router_group_fetches: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    gated: AtomicBool,
    pub fetch_started: Notify,
    pub release: Notify,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        let registry = Self::default();
        registry.gated.store(true, Ordering::SeqCst);
        Arc::new(registry)
    }

    pub fn push_response(&self, response: Result<Vec<TcpRouteMapping>, RegistryError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue an event stream body, delivered as the given chunks.
    pub fn push_event_body(&self, chunks: Vec<&'static str>) {
        self.event_bodies.lock().unwrap().push_back(chunks);
    }

    pub fn push_router_groups(&self, response: Result<Vec<RouterGroup>, RegistryError>) {
        self.router_groups.lock().unwrap().push_back(response);
    }

    pub fn router_group_fetch_count(&self) -> usize {
        self.router_group_fetches.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl RouteRegistry for FakeRegistry {
    async fn tcp_route_mappings(
        &self,
        token: &str,
    ) -> Result<Vec<TcpRouteMapping>, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());

        if self.gated.load(Ordering::SeqCst) {
            self.fetch_started.notify_one();
            self.release.notified().await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn tcp_events(&self, token: &str) -> Result<TcpEventStream, RegistryError> {
        self.tokens.lock().unwrap().push(token.to_string());

        let body = self.event_bodies.lock().unwrap().pop_front();
        match body {
            Some(chunks) => {
                let chunks: Vec<reqwest::Result<Bytes>> = chunks
                    .into_iter()
                    .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                    .collect();
                Ok(TcpEventStream::new(futures_util::stream::iter(chunks)))
            }
            None => Err(RegistryError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
        }
    }

    async fn router_groups(&self, token: &str) -> Result<Vec<RouterGroup>, RegistryError> {
        self.router_group_fetches.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());

        let next = self.router_groups.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Hands out numbered tokens and records each `force_refresh` flag.
#[derive(Default)]
pub struct FakeTokenFetcher {
    requests: Mutex<Vec<bool>>,
    fail: AtomicBool,
}

impl FakeTokenFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let fetcher = Self::default();
        fetcher.fail.store(true, Ordering::SeqCst);
        Arc::new(fetcher)
    }

    pub fn requests(&self) -> Vec<bool> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenFetcher for FakeTokenFetcher {
    async fn fetch_token(&self, force_refresh: bool) -> anyhow::Result<String> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(force_refresh);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("uaa unavailable");
        }
        Ok(format!("token-{}", requests.len()))
    }
}
