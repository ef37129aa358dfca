//! One HTTP exchange with the object store
//!
//! A [`RequestContext`] owns everything about a single exchange: its target,
//! outgoing headers and body, the captured response headers and body, and
//! the optional part it transfers. Its lifecycle is
//! `Built -> Signed -> Dispatched -> Completed(status) | TransportFailed`.
//!
//! The transport drives it through four calls:
//! [`prepare_for_dispatch`](RequestContext::prepare_for_dispatch),
//! [`on_header_line`](RequestContext::on_header_line),
//! [`on_body_chunk`](RequestContext::on_body_chunk) and
//! [`on_complete`](RequestContext::on_complete) (or
//! [`on_transport_failure`](RequestContext::on_transport_failure)).
//! None of them block; descriptor writes are positional and bounded by the
//! chunk size.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use jiff::Timestamp;
use reqwest::Method;

use bfs_core::{
    ByteBuffer, Descriptor, Error, HeadTarget, HeaderTable, ListOptions, MimeTable, ObjectInfo,
    ObjectPath, Result, TransportConfig, UrlResource,
};

use crate::body::{BodyCursor, BodySink, write_all_at};
use crate::checksum;
use crate::multipart::PartDescriptor;
use crate::signature::{CanonicalRequest, Signer};
use crate::transport::Transport;
use crate::xml;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of one dispatched exchange; a resubmission gets a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the exchange does on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    CheckBucket,
    Head,
    Get,
    Put,
    PutHead,
    Copy,
    Delete,
    List,
    ListMultipart,
    InitiateMultipart,
    UploadPart,
    CopyPart,
    CompleteMultipart,
    AbortMultipart,
}

impl ExchangeKind {
    pub fn method(self) -> Method {
        match self {
            ExchangeKind::CheckBucket | ExchangeKind::Head => Method::HEAD,
            ExchangeKind::Get | ExchangeKind::List | ExchangeKind::ListMultipart => Method::GET,
            ExchangeKind::Put
            | ExchangeKind::PutHead
            | ExchangeKind::Copy
            | ExchangeKind::UploadPart
            | ExchangeKind::CopyPart => Method::PUT,
            ExchangeKind::InitiateMultipart | ExchangeKind::CompleteMultipart => Method::POST,
            ExchangeKind::Delete | ExchangeKind::AbortMultipart => Method::DELETE,
        }
    }

    pub fn is_part(self) -> bool {
        matches!(self, ExchangeKind::UploadPart | ExchangeKind::CopyPart)
    }
}

/// Where an exchange is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Built,
    Signed,
    Dispatched,
    Completed(u16),
    TransportFailed(String),
}

/// The unit of work an exchange belongs to; at most one exchange per key is active
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    pub path: String,
    pub part_number: Option<u32>,
}

impl std::fmt::Display for WorkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.part_number {
            Some(n) => write!(f, "{} part {n}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// A fully signed request, ready for the HTTP client
#[derive(Debug)]
pub struct DispatchRequest {
    pub handle: HandleId,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<BodyCursor>,
}

/// `Date` header value for `ts`
pub fn http_date(ts: Timestamp) -> String {
    ts.strftime("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// One exchange with the object store
#[derive(Debug)]
pub struct RequestContext {
    handle: HandleId,
    config: Arc<TransportConfig>,
    kind: ExchangeKind,
    path: ObjectPath,
    base_path: Option<String>,
    saved_path: Option<String>,
    target: UrlResource,
    headers: BTreeMap<String, String>,
    body: Option<BodyCursor>,
    sink: BodySink,
    part: Option<PartDescriptor>,
    response_headers: HeaderTable,
    head_data: ByteBuffer,
    body_data: ByteBuffer,
    last_status: Option<u16>,
    state: ExchangeState,
}

impl RequestContext {
    pub fn new(
        config: Arc<TransportConfig>,
        kind: ExchangeKind,
        path: &ObjectPath,
        target: UrlResource,
    ) -> Self {
        Self {
            handle: HandleId::next(),
            config,
            kind,
            path: path.clone(),
            base_path: None,
            saved_path: None,
            target,
            headers: BTreeMap::new(),
            body: None,
            sink: BodySink::Buffer,
            part: None,
            response_headers: HeaderTable::new(),
            head_data: ByteBuffer::new(),
            body_data: ByteBuffer::new(),
            last_status: None,
            state: ExchangeState::Built,
        }
    }

    fn object(config: &Arc<TransportConfig>, kind: ExchangeKind, path: &ObjectPath) -> Self {
        let target = UrlResource::new(&config.endpoint, &config.bucket, path);
        Self::new(config.clone(), kind, path, target)
    }

    /// `HEAD /<bucket>/`
    pub fn check_bucket(config: &Arc<TransportConfig>) -> Self {
        Self::object(config, ExchangeKind::CheckBucket, &ObjectPath::root())
    }

    /// `HEAD` of one object, carrying the caller's bookkeeping paths
    pub fn head(config: &Arc<TransportConfig>, target: &HeadTarget) -> Self {
        let mut exchange = Self::object(config, ExchangeKind::Head, &target.path);
        exchange.base_path = target.base_path.clone();
        exchange.saved_path = target.saved_path.clone();
        exchange
    }

    /// `GET` into `file` at `file_offset`; `range` is `(start, size)` of the object
    pub fn get(
        config: &Arc<TransportConfig>,
        path: &ObjectPath,
        file: Descriptor,
        file_offset: u64,
        range: Option<(u64, u64)>,
    ) -> Self {
        let mut exchange = Self::object(config, ExchangeKind::Get, path);
        if let Some((start, size)) = range.filter(|(_, size)| *size > 0) {
            exchange.set_header("range", format!("bytes={}-{}", start, start + size - 1));
        }
        exchange.sink = BodySink::file(file, file_offset);
        exchange
    }

    /// `PUT` of `[0, size)` of `file`
    pub fn put(
        config: &Arc<TransportConfig>,
        mime: &MimeTable,
        path: &ObjectPath,
        meta: &HeaderTable,
        file: Descriptor,
        size: u64,
    ) -> Result<Self> {
        let mut exchange = Self::object(config, ExchangeKind::Put, path);
        exchange.apply_object_headers(meta, mime);
        if config.content_md5 {
            exchange.set_header("content-md5", checksum::md5_base64(&file, 0, size)?);
        }
        exchange.set_body(BodyCursor::file(file, 0, size));
        Ok(exchange)
    }

    /// Metadata replacement: copy the object onto itself with new headers
    pub fn put_head(
        config: &Arc<TransportConfig>,
        mime: &MimeTable,
        path: &ObjectPath,
        meta: &HeaderTable,
    ) -> Self {
        let mut exchange = Self::copy(config, mime, path, path, meta);
        exchange.kind = ExchangeKind::PutHead;
        exchange
    }

    /// Server-side copy of `from` to `to`, replacing the metadata with `meta`
    pub fn copy(
        config: &Arc<TransportConfig>,
        mime: &MimeTable,
        from: &ObjectPath,
        to: &ObjectPath,
        meta: &HeaderTable,
    ) -> Self {
        let mut exchange = Self::object(config, ExchangeKind::Copy, to);
        exchange.apply_object_headers(meta, mime);
        let source = UrlResource::new(&config.endpoint, &config.bucket, from).resource;
        exchange.set_header("x-amz-copy-source", source);
        exchange.set_header("x-amz-metadata-directive", "REPLACE");
        exchange
    }

    pub fn delete(config: &Arc<TransportConfig>, path: &ObjectPath) -> Self {
        Self::object(config, ExchangeKind::Delete, path)
    }

    /// One page of the bucket listing
    pub fn list(config: &Arc<TransportConfig>, options: &ListOptions) -> Self {
        let root = ObjectPath::root();
        let target =
            UrlResource::new(&config.endpoint, &config.bucket, &root).with_query(&options.query());
        Self::new(config.clone(), ExchangeKind::List, &root, target)
    }

    /// `GET /<bucket>/?uploads`
    pub fn list_multipart(config: &Arc<TransportConfig>) -> Self {
        let root = ObjectPath::root();
        let target =
            UrlResource::new(&config.endpoint, &config.bucket, &root).with_sub_resource("uploads");
        Self::new(config.clone(), ExchangeKind::ListMultipart, &root, target)
    }

    /// Set (or merge, comma-separated) an outgoing header
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.headers
            .entry(name.trim().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    /// Replace an outgoing header
    pub fn replace_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .insert(name.trim().to_ascii_lowercase(), value.into());
    }

    pub fn set_body(&mut self, body: BodyCursor) {
        self.body = Some(body);
    }

    pub fn set_part(&mut self, part: PartDescriptor) {
        self.part = Some(part);
    }

    /// Content type, ACL, user metadata and storage flags for a new object
    pub fn apply_object_headers(&mut self, meta: &HeaderTable, mime: &MimeTable) {
        let content_type = meta
            .get("content-type")
            .map(str::to_string)
            .unwrap_or_else(|| mime.lookup(self.path.as_str()));
        self.replace_header("content-type", content_type);

        match meta.get("x-amz-acl") {
            Some(acl) => self.replace_header("x-amz-acl", acl),
            None if !self.config.default_acl.is_empty() => {
                let acl = self.config.default_acl.clone();
                self.replace_header("x-amz-acl", acl);
            }
            None => {}
        }

        for (name, value) in meta.user_metadata() {
            self.replace_header(name, value);
        }
        if self.config.use_rrs {
            self.replace_header("x-amz-storage-class", "REDUCED_REDUNDANCY");
        }
        if self.config.use_sse {
            self.replace_header("x-amz-server-side-encryption", "AES256");
        }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn method(&self) -> Method {
        self.kind.method()
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    pub fn saved_path(&self) -> Option<&str> {
        self.saved_path.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.target.url
    }

    pub fn resource(&self) -> &str {
        &self.target.resource
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn part(&self) -> Option<&PartDescriptor> {
        self.part.as_ref()
    }

    pub fn response_headers(&self) -> &HeaderTable {
        &self.response_headers
    }

    /// Raw response header lines as received
    pub fn head_data(&self) -> &ByteBuffer {
        &self.head_data
    }

    pub fn body_data(&self) -> &ByteBuffer {
        &self.body_data
    }

    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Bytes the body sink wrote to the caller's descriptor
    pub fn bytes_written(&self) -> u64 {
        self.sink.written()
    }

    pub fn work_key(&self) -> WorkKey {
        WorkKey {
            path: self.path.as_str().to_string(),
            part_number: self.part.as_ref().map(PartDescriptor::part_number),
        }
    }

    /// Sign with the current time and hand out the request.
    pub fn prepare_for_dispatch(&mut self) -> Result<DispatchRequest> {
        self.prepare_for_dispatch_at(&http_date(Timestamp::now()))
    }

    /// Sign with `date` and hand out the request.
    ///
    /// Resets the response side, so a context may be dispatched again after
    /// a transport failure without keeping stale headers or body bytes.
    pub fn prepare_for_dispatch_at(&mut self, date: &str) -> Result<DispatchRequest> {
        self.response_headers.clear();
        self.head_data.clear();
        self.body_data.clear();
        self.sink.rewind();
        self.last_status = None;

        let method = self.method();
        self.replace_header("date", date);
        self.headers.remove("authorization");

        if let Some(signer) = Signer::from_config(&self.config)? {
            let request = CanonicalRequest {
                method: method.as_str(),
                content_md5: self.header("content-md5").unwrap_or_default(),
                content_type: self.header("content-type").unwrap_or_default(),
                date,
                resource: &self.target.resource,
            };
            let authorization = signer.authorization(
                &request,
                self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )?;
            self.replace_header("authorization", authorization);
        }
        self.state = ExchangeState::Signed;

        let content_length = match &self.body {
            Some(body) => Some(body.remaining()),
            None if matches!(method, Method::PUT | Method::POST) => Some(0),
            None => None,
        };
        if let Some(len) = content_length {
            self.replace_header("content-length", len.to_string());
        }

        tracing::debug!(
            handle = %self.handle,
            method = %method,
            url = %self.target.url,
            "Dispatching request"
        );
        self.state = ExchangeState::Dispatched;

        Ok(DispatchRequest {
            handle: self.handle,
            method,
            url: self.target.url.clone(),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: self.body.clone(),
        })
    }

    /// Consume one received header line (status line included).
    pub fn on_header_line(&mut self, line: &str) -> Result<()> {
        self.head_data.append(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.head_data.append(b"\r\n")?;
        }

        if line.starts_with("HTTP/") {
            // a new status line starts a new header block (100-continue, redirects)
            self.response_headers.clear();
            if let Some(status) = line
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse::<u16>().ok())
            {
                self.last_status = Some(status);
            }
        } else {
            self.response_headers.parse_line(line);
        }
        Ok(())
    }

    /// Consume one received body chunk.
    ///
    /// Successful `GET` bodies go to the caller's descriptor; everything else,
    /// error documents included, goes to the body buffer.
    pub fn on_body_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let success = self.last_status.is_some_and(|s| (200..300).contains(&s));
        match &mut self.sink {
            BodySink::File {
                file,
                offset,
                written,
            } if success => {
                write_all_at(file, chunk, *offset + *written)?;
                *written += chunk.len() as u64;
                Ok(())
            }
            _ => self.body_data.append(chunk),
        }
    }

    pub fn on_complete(&mut self, status: u16) {
        self.last_status = Some(status);
        self.state = ExchangeState::Completed(status);
    }

    pub fn on_transport_failure(&mut self, message: impl Into<String>) {
        self.state = ExchangeState::TransportFailed(message.into());
    }

    /// Classify the finished exchange.
    pub fn outcome(&self) -> Result<()> {
        match &self.state {
            ExchangeState::TransportFailed(message) => Err(Error::Transport(format!(
                "{} {}: {message}",
                self.method(),
                self.target.url
            ))),
            ExchangeState::Completed(status) if (200..300).contains(status) => {
                self.check_success_body(*status)?;
                if self.kind.is_part() {
                    self.part_token()?;
                }
                Ok(())
            }
            ExchangeState::Completed(status) => {
                let body = self.body_data.to_str_lossy();
                let (code, message) = xml::parse_error(&body).unwrap_or_default();
                let message = message.unwrap_or_else(|| {
                    reqwest::StatusCode::from_u16(*status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("request failed")
                        .to_string()
                });
                Err(Error::protocol(*status, code, message))
            }
            state => Err(Error::General(format!(
                "exchange {} for {} has not finished ({state:?})",
                self.handle, self.path
            ))),
        }
    }

    /// The provider may report a failed completion or copy inside a 200 body.
    fn check_success_body(&self, status: u16) -> Result<()> {
        if !matches!(
            self.kind,
            ExchangeKind::CompleteMultipart
                | ExchangeKind::CopyPart
                | ExchangeKind::Copy
                | ExchangeKind::PutHead
        ) {
            return Ok(());
        }
        let body = self.body_data.to_str_lossy();
        if !body.contains("<Error>") {
            return Ok(());
        }
        match xml::parse_error(&body) {
            Some((code, message)) => {
                tracing::warn!(
                    path = %self.path,
                    status,
                    code = code.as_deref().unwrap_or_default(),
                    "Error document in a success response"
                );
                Err(Error::protocol(
                    500,
                    code,
                    message.unwrap_or_else(|| "error in success response".into()),
                ))
            }
            None => Ok(()),
        }
    }

    /// The token a finished part returned, checked against its expected MD5.
    pub fn part_token(&self) -> Result<String> {
        let Some(part) = &self.part else {
            return Err(Error::General(format!("{} carries no part", self.handle)));
        };

        let received = match self.kind {
            ExchangeKind::CopyPart => xml::parse_copy_etag(&self.body_data.to_str_lossy())?,
            _ => self
                .response_headers
                .etag()
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::protocol(
                        self.last_status.unwrap_or(0),
                        None,
                        format!("no ETag for {} part {}", self.path, part.part_number()),
                    )
                })?,
        };

        if let Some(expected) = part.expected_etag()
            && !expected.eq_ignore_ascii_case(&received)
        {
            return Err(Error::IntegrityMismatch {
                path: self.path.to_string(),
                part_number: part.part_number(),
                expected: expected.to_string(),
                received,
            });
        }
        Ok(received)
    }

    /// Write the finished part's token into its reserved ETag slot.
    pub fn commit_part(&mut self) -> Result<()> {
        let token = self.part_token()?;
        match &mut self.part {
            Some(part) => part.record(token),
            None => Err(Error::General(format!("{} carries no part", self.handle))),
        }
    }

    /// Object metadata from a finished `HEAD`
    pub fn object_info(&self) -> ObjectInfo {
        ObjectInfo::from_headers(&self.path, self.response_headers.clone())
    }

    /// A fresh exchange for the same work, for resubmission after a failure
    pub fn replacement(&self) -> Self {
        let mut headers = self.headers.clone();
        for volatile in ["date", "authorization", "content-length"] {
            headers.remove(volatile);
        }
        let mut sink = self.sink.clone();
        sink.rewind();

        Self {
            handle: HandleId::next(),
            config: self.config.clone(),
            kind: self.kind,
            path: self.path.clone(),
            base_path: self.base_path.clone(),
            saved_path: self.saved_path.clone(),
            target: self.target.clone(),
            headers,
            body: self.body.clone(),
            sink,
            part: self.part.clone(),
            response_headers: HeaderTable::new(),
            head_data: ByteBuffer::new(),
            body_data: ByteBuffer::new(),
            last_status: None,
            state: ExchangeState::Built,
        }
    }

    /// Run to completion on `transport`, resubmitting retryable failures
    /// with backoff until the retry budget is spent.
    pub async fn execute(&mut self, transport: &dyn Transport) -> Result<()> {
        let retry = self.config.retry.clone();
        let mut attempt = 1;
        loop {
            transport.perform(self).await?;
            let error = match self.outcome() {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= retry.max_attempts {
                return Err(Error::RetriesExhausted {
                    path: self.path.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = retry.backoff(attempt);
            tracing::warn!(
                path = %self.path,
                method = %self.method(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            *self = self.replacement();
        }
    }
}
