//! HTTP transport seam
//!
//! [`Transport`] performs one exchange. [`HttpTransport`] is the reqwest
//! implementation: one shared client (connection pool, resolver, TLS
//! configuration) used by every exchange, plus a shared progress table that
//! fails exchanges whose bytes stop moving.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Body, Certificate, Client};
use tokio::time::Instant;

use bfs_core::{Error, Result, TransportConfig};

use crate::context::{HandleId, RequestContext};

/// Runs exchanges against the object store
///
/// Network-level failures (connect, TLS, reset, stall) are recorded on the
/// exchange as `TransportFailed` and return `Ok`, so the caller classifies
/// them like any other outcome. `Err` is reserved for failures local to the
/// exchange: signing, buffer growth, descriptor I/O, malformed headers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, exchange: &mut RequestContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    uploaded: u64,
    downloaded: u64,
    last_change: Instant,
}

/// Bytes moved per in-flight exchange, shared by all of them
#[derive(Debug, Default)]
pub struct ProgressTable {
    entries: Mutex<HashMap<HandleId, Progress>>,
}

impl ProgressTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start tracking `handle`; tracking ends when the guard drops.
    pub fn track(self: &Arc<Self>, handle: HandleId) -> ProgressGuard {
        self.entries.lock().insert(
            handle,
            Progress {
                uploaded: 0,
                downloaded: 0,
                last_change: Instant::now(),
            },
        );
        ProgressGuard {
            table: self.clone(),
            handle,
        }
    }

    pub fn record_upload(&self, handle: HandleId, bytes: usize) {
        self.record(handle, bytes, 0);
    }

    pub fn record_download(&self, handle: HandleId, bytes: usize) {
        self.record(handle, 0, bytes);
    }

    fn record(&self, handle: HandleId, up: usize, down: usize) {
        if up == 0 && down == 0 {
            return;
        }
        if let Some(p) = self.entries.lock().get_mut(&handle) {
            p.uploaded += up as u64;
            p.downloaded += down as u64;
            p.last_change = Instant::now();
        }
    }

    /// `(uploaded, downloaded)` so far
    pub fn transferred(&self, handle: HandleId) -> Option<(u64, u64)> {
        self.entries
            .lock()
            .get(&handle)
            .map(|p| (p.uploaded, p.downloaded))
    }

    /// Time since `handle` last moved a byte
    pub fn idle_for(&self, handle: HandleId) -> Option<Duration> {
        self.entries
            .lock()
            .get(&handle)
            .map(|p| p.last_change.elapsed())
    }

    pub fn is_stalled(&self, handle: HandleId, limit: Duration) -> bool {
        self.idle_for(handle).is_some_and(|idle| idle >= limit)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes an exchange from the progress table when dropped
#[derive(Debug)]
pub struct ProgressGuard {
    table: Arc<ProgressTable>,
    handle: HandleId,
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.table.entries.lock().remove(&self.handle);
    }
}

/// reqwest-backed transport shared by every exchange of one client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    stall_timeout: Option<Duration>,
    progress: Arc<ProgressTable>,
}

impl HttpTransport {
    /// Build the shared HTTP client from the transport configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout.connect_ms))
            .danger_accept_invalid_hostnames(!config.ssl_verify_hostname)
            .user_agent(concat!("bfs/", env!("CARGO_PKG_VERSION")));

        if !config.dns_cache {
            // no idle connections, so every exchange resolves and connects afresh
            builder = builder.pool_max_idle_per_host(0);
        }

        if let Some(ca_bundle) = &config.ca_bundle {
            let pem = std::fs::read(ca_bundle)?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                Error::Config(format!("Invalid CA bundle {}: {e}", ca_bundle.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

        let stall_timeout =
            (config.timeout.read_ms > 0).then(|| Duration::from_millis(config.timeout.read_ms));

        Ok(Self {
            client,
            stall_timeout,
            progress: ProgressTable::new(),
        })
    }

    /// The shared progress table
    pub fn progress(&self) -> &Arc<ProgressTable> {
        &self.progress
    }

    /// Resolves once `handle` has not moved a byte for the stall timeout.
    async fn stalled(&self, handle: HandleId) {
        let Some(limit) = self.stall_timeout else {
            return futures::future::pending().await;
        };
        let tick = (limit / 4).max(Duration::from_millis(10));
        loop {
            tokio::time::sleep(tick).await;
            if self.progress.is_stalled(handle, limit) {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, exchange: &mut RequestContext) -> Result<()> {
        let request = exchange.prepare_for_dispatch()?;
        let handle = request.handle;
        let _guard = self.progress.track(handle);

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            let progress = self.progress.clone();
            let stream = body.into_stream(move |n| progress.record_upload(handle, n));
            builder = builder.body(Body::wrap_stream(stream));
        }

        let sent = tokio::select! {
            sent = builder.send() => sent,
            _ = self.stalled(handle) => {
                tracing::warn!(handle = %handle, url = %request.url, "Request stalled before response");
                exchange.on_transport_failure("no progress before response headers");
                return Ok(());
            }
        };

        let mut response = match sent {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(Error::General(format!("Invalid request {}: {e}", request.url)));
            }
            Err(e) => {
                tracing::debug!(handle = %handle, error = %e, "Request failed");
                exchange.on_transport_failure(e.to_string());
                return Ok(());
            }
        };

        let status = response.status();
        exchange.on_header_line(&format!("{:?} {}", response.version(), status))?;
        for (name, value) in response.headers() {
            exchange.on_header_line(&format!(
                "{}: {}",
                name,
                String::from_utf8_lossy(value.as_bytes())
            ))?;
        }

        loop {
            let next = match self.stall_timeout {
                Some(limit) => tokio::time::timeout(limit, response.chunk()).await,
                None => Ok(response.chunk().await),
            };
            match next {
                Ok(Ok(Some(chunk))) => {
                    self.progress.record_download(handle, chunk.len());
                    exchange.on_body_chunk(&chunk)?;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    exchange.on_transport_failure(format!("reading response body: {e}"));
                    return Ok(());
                }
                Err(_) => {
                    tracing::warn!(handle = %handle, url = %request.url, "Response body stalled");
                    exchange.on_transport_failure("no progress while reading response body");
                    return Ok(());
                }
            }
        }

        tracing::debug!(handle = %handle, status = status.as_u16(), "Request finished");
        exchange.on_complete(status.as_u16());
        Ok(())
    }
}
