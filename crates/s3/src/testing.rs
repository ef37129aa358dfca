//! In-memory transport for tests
//!
//! Answers every exchange from a responder closure, records what was sent,
//! and measures how many exchanges were in flight at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;

use bfs_core::Result;

use crate::context::RequestContext;
use crate::transport::Transport;

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The scripted answer to one request
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
    transport_error: Option<String>,
}

impl ScriptedResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            delay: Duration::ZERO,
            transport_error: None,
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    /// The connection fails instead of answering
    pub fn transport_failure(message: &str) -> Self {
        Self {
            transport_error: Some(message.to_string()),
            ..Self::status(0)
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Answer only after `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = Box<dyn Fn(&Recorded) -> ScriptedResponse + Send + Sync>;

pub struct ScriptedTransport {
    responder: Responder,
    requests: Mutex<Vec<Recorded>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    per_url: Mutex<HashMap<String, usize>>,
    peak_per_url: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Recorded) -> ScriptedResponse + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            per_url: Mutex::new(HashMap::new()),
            peak_per_url: AtomicUsize::new(0),
        }
    }

    /// Every request dispatched so far, in dispatch order
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous exchanges against one URL
    pub fn peak_per_url(&self) -> usize {
        self.peak_per_url.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn perform(&self, exchange: &mut RequestContext) -> Result<()> {
        let request = exchange.prepare_for_dispatch()?;

        let mut body = Vec::new();
        if let Some(mut cursor) = request.body {
            loop {
                let chunk = cursor.read_chunk(crate::body::CHUNK_SIZE)?;
                if chunk.is_empty() {
                    break;
                }
                body.extend_from_slice(&chunk);
            }
        }
        let recorded = Recorded {
            method: request.method,
            url: request.url,
            headers: request.headers.into_iter().collect(),
            body,
        };
        self.requests.lock().push(recorded.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        {
            let mut per_url = self.per_url.lock();
            let count = per_url.entry(recorded.url.clone()).or_insert(0);
            *count += 1;
            self.peak_per_url.fetch_max(*count, Ordering::SeqCst);
        }

        let response = (self.responder)(&recorded);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.per_url.lock().get_mut(&recorded.url) {
            *count -= 1;
        }

        if let Some(message) = response.transport_error {
            exchange.on_transport_failure(message);
            return Ok(());
        }

        exchange.on_header_line(&format!("HTTP/1.1 {}", response.status))?;
        for (name, value) in &response.headers {
            exchange.on_header_line(&format!("{name}: {value}"))?;
        }
        if !response.body.is_empty() {
            exchange.on_body_chunk(&response.body)?;
        }
        exchange.on_complete(response.status);
        Ok(())
    }
}
