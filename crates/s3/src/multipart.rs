//! Multipart upload protocol
//!
//! A multipart transfer is three phases, each a single exchange:
//!
//! 1. initiate (`POST ?uploads`) returns the session's upload id,
//! 2. one exchange per part, either an upload of a descriptor range
//!    (`PUT ?partNumber=N&uploadId=ID`) or a server-side copy of a source
//!    range (same sub-resource plus `x-amz-copy-source`),
//! 3. complete (`POST ?uploadId=ID`) with the part number / ETag list.
//!
//! Every part reserves its slot in the shared [`EtagList`] when its
//! descriptor is created, so the list reads back in part order no matter in
//! which order the part exchanges finish.

use std::sync::Arc;

use parking_lot::Mutex;

use bfs_core::config::{MAX_PART_SIZE, MIN_PART_SIZE};
use bfs_core::{
    Descriptor, Error, HeadTarget, HeaderTable, MimeTable, ObjectPath, Result, TransportConfig,
    UrlResource,
};

use crate::body::BodyCursor;
use crate::checksum;
use crate::context::{ExchangeKind, RequestContext};
use crate::transport::Transport;
use crate::xml;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: usize = 10_000;

/// Calculate number of parts for a file
pub fn calculate_parts(file_size: u64, part_size: u64) -> usize {
    file_size.div_ceil(part_size) as usize
}

/// Get the `[start, end)` byte range of a 1-based part
pub fn part_byte_range(part_number: u32, part_size: u64, total_size: u64) -> (u64, u64) {
    let start = (part_number as u64 - 1) * part_size;
    let end = (start + part_size).min(total_size);
    (start, end)
}

/// Part size to use for `file_size`, grown when `part_size` would need too many parts
pub fn effective_part_size(file_size: u64, part_size: u64) -> u64 {
    let part_size = part_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
    if file_size.div_ceil(part_size) <= MAX_PARTS as u64 {
        part_size
    } else {
        file_size
            .div_ceil(MAX_PARTS as u64)
            .clamp(MIN_PART_SIZE, MAX_PART_SIZE)
    }
}

/// How an object of `total_size` bytes splits into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub count: usize,
}

impl PartPlan {
    /// Plan a transfer; empty objects and objects that fit in one part are rejected.
    pub fn new(total_size: u64, part_size: u64) -> Result<Self> {
        let part_size = effective_part_size(total_size, part_size);
        let count = calculate_parts(total_size, part_size);
        if count < 2 {
            return Err(Error::MultipartRejected {
                size: total_size,
                part_size,
            });
        }
        Ok(Self {
            total_size,
            part_size,
            count,
        })
    }

    /// `(part_number, start, size)` for every part in order
    pub fn ranges(&self) -> impl Iterator<Item = (u32, u64, u64)> + '_ {
        (1..=self.count as u32).map(|n| {
            let (start, end) = part_byte_range(n, self.part_size, self.total_size);
            (n, start, end - start)
        })
    }
}

/// Ordered integrity tokens of one multipart sequence, one slot per part
#[derive(Debug, Clone, Default)]
pub struct EtagList {
    slots: Arc<Mutex<Vec<Option<String>>>>,
}

impl EtagList {
    /// A list with `count` empty slots
    pub fn with_parts(count: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![None; count])),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Back-reference to slot `index`, owned by part `index + 1`
    pub fn slot(&self, index: usize) -> EtagSlot {
        EtagSlot {
            list: self.clone(),
            index,
        }
    }

    /// Number of slots already written
    pub fn filled(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Tokens in part order; fails if any part has not reported yet
    pub fn tokens(&self) -> Result<Vec<String>> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.clone()
                    .ok_or_else(|| Error::General(format!("part {} has no ETag", i + 1)))
            })
            .collect()
    }
}

/// A part's reserved position in an [`EtagList`]
#[derive(Debug, Clone)]
pub struct EtagSlot {
    list: EtagList,
    index: usize,
}

impl EtagSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    fn fill(&self, token: String) -> Result<()> {
        let mut slots = self.list.slots.lock();
        let slot = slots.get_mut(self.index).ok_or_else(|| {
            Error::General(format!("ETag slot {} outside the list", self.index))
        })?;
        *slot = Some(token);
        Ok(())
    }
}

/// One part of a multipart transfer
#[derive(Debug, Clone)]
pub struct PartDescriptor {
    start: u64,
    size: u64,
    expected_etag: Option<String>,
    received_etag: Option<String>,
    done: bool,
    slot: EtagSlot,
}

impl PartDescriptor {
    /// Part covering `[start, start + size)`, writing into `slot`
    pub fn new(slot: EtagSlot, start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            expected_etag: None,
            received_etag: None,
            done: false,
            slot,
        }
    }

    /// Expect the provider to report `etag` for this part
    pub fn with_expected_etag(mut self, etag: impl Into<String>) -> Self {
        self.expected_etag = Some(etag.into());
        self
    }

    /// 1-based part number, derived from the reserved slot
    pub fn part_number(&self) -> u32 {
        self.slot.index as u32 + 1
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn expected_etag(&self) -> Option<&str> {
        self.expected_etag.as_deref()
    }

    pub fn received_etag(&self) -> Option<&str> {
        self.received_etag.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Store the part's token in its reserved slot and mark it finished.
    pub fn record(&mut self, token: String) -> Result<()> {
        self.slot.fill(token.clone())?;
        self.received_etag = Some(token);
        self.done = true;
        Ok(())
    }

    /// Inclusive HTTP range of this part, `bytes=start-end`
    pub fn http_range(&self) -> String {
        format!("bytes={}-{}", self.start, self.start + self.size - 1)
    }
}

/// An open session on the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub path: ObjectPath,
    pub upload_id: String,
}

fn part_sub_resource(part_number: u32, upload_id: &str) -> String {
    format!("partNumber={part_number}&uploadId={upload_id}")
}

/// `POST ?uploads` with the object's headers
pub fn initiate_request(
    config: &Arc<TransportConfig>,
    mime: &MimeTable,
    path: &ObjectPath,
    meta: &HeaderTable,
) -> RequestContext {
    let target = UrlResource::new(&config.endpoint, &config.bucket, path).with_sub_resource("uploads");
    let mut exchange = RequestContext::new(config.clone(), ExchangeKind::InitiateMultipart, path, target);
    exchange.apply_object_headers(meta, mime);
    exchange
}

/// Upload of `part`'s range of `file`
///
/// The part's MD5 is computed only when `content_md5` is configured; it is
/// then sent as `Content-MD5` and checked against the returned ETag.
pub fn upload_part_request(
    config: &Arc<TransportConfig>,
    session: &MultipartSession,
    file: Descriptor,
    mut part: PartDescriptor,
) -> Result<RequestContext> {
    let target = UrlResource::new(&config.endpoint, &config.bucket, &session.path)
        .with_sub_resource(&part_sub_resource(part.part_number(), &session.upload_id));
    let mut exchange =
        RequestContext::new(config.clone(), ExchangeKind::UploadPart, &session.path, target);

    if config.content_md5 {
        let digest = checksum::md5_range(&file, part.start(), part.size())?;
        exchange.set_header("content-md5", checksum::encode_base64(&digest));
        part = part.with_expected_etag(hex::encode(digest));
    }

    exchange.set_body(BodyCursor::file(file, part.start(), part.size()));
    exchange.set_part(part);
    Ok(exchange)
}

/// Server-side copy of `part`'s range of `source`
pub fn copy_part_request(
    config: &Arc<TransportConfig>,
    session: &MultipartSession,
    source: &ObjectPath,
    part: PartDescriptor,
) -> RequestContext {
    let target = UrlResource::new(&config.endpoint, &config.bucket, &session.path)
        .with_sub_resource(&part_sub_resource(part.part_number(), &session.upload_id));
    let mut exchange =
        RequestContext::new(config.clone(), ExchangeKind::CopyPart, &session.path, target);

    let source_resource = UrlResource::new(&config.endpoint, &config.bucket, source).resource;
    exchange.set_header("x-amz-copy-source", source_resource);
    exchange.set_header("x-amz-copy-source-range", part.http_range());
    exchange.set_part(part);
    exchange
}

/// `POST ?uploadId=ID` listing `etags` as parts 1..=N
pub fn complete_request(
    config: &Arc<TransportConfig>,
    session: &MultipartSession,
    etags: &[String],
) -> Result<RequestContext> {
    // a one-part object is a plain PUT
    if etags.len() < 2 {
        return Err(Error::MultipartRejected {
            size: etags.len() as u64,
            part_size: 0,
        });
    }

    let target = UrlResource::new(&config.endpoint, &config.bucket, &session.path)
        .with_sub_resource(&format!("uploadId={}", session.upload_id));
    let mut exchange = RequestContext::new(
        config.clone(),
        ExchangeKind::CompleteMultipart,
        &session.path,
        target,
    );
    let body = xml::complete_multipart_body(etags);
    exchange.set_header("content-type", "application/xml");
    if config.content_md5 {
        exchange.set_header("content-md5", checksum::content_md5(body.as_bytes()));
    }
    exchange.set_body(BodyCursor::memory(body));
    Ok(exchange)
}

/// `DELETE ?uploadId=ID`
pub fn abort_request(
    config: &Arc<TransportConfig>,
    path: &ObjectPath,
    upload_id: &str,
) -> RequestContext {
    let target = UrlResource::new(&config.endpoint, &config.bucket, path)
        .with_sub_resource(&format!("uploadId={upload_id}"));
    RequestContext::new(config.clone(), ExchangeKind::AbortMultipart, path, target)
}

/// Start a session and return its upload id
pub async fn initiate(
    transport: &dyn Transport,
    config: &Arc<TransportConfig>,
    mime: &MimeTable,
    path: &ObjectPath,
    meta: &HeaderTable,
) -> Result<MultipartSession> {
    let mut exchange = initiate_request(config, mime, path, meta);
    exchange.execute(transport).await?;
    let upload_id = xml::parse_upload_id(&exchange.body_data().to_str_lossy())?;
    tracing::debug!(path = %path, upload_id = %upload_id, "Multipart session started");
    Ok(MultipartSession {
        path: path.clone(),
        upload_id,
    })
}

/// Finish a session from its ETag list
///
/// On failure the session stays open; the error carries the upload id.
///
/// A completion whose response was lost is retried and then answered with
/// `NoSuchUpload`, because the first attempt already consumed the session.
/// Before that is reported as a lost session, the object is checked: if its
/// ETag is the one these parts assemble into, the session did complete.
pub async fn complete(
    transport: &dyn Transport,
    config: &Arc<TransportConfig>,
    session: &MultipartSession,
    etags: &EtagList,
) -> Result<()> {
    let tokens = etags.tokens()?;
    let mut exchange = complete_request(config, session, &tokens)?;
    if let Err(e) = exchange.execute(transport).await {
        if !(e.is_session_lost() && already_completed(transport, config, session, &tokens).await) {
            return Err(e);
        }
        tracing::info!(
            path = %session.path,
            upload_id = %session.upload_id,
            "Multipart session was completed by an earlier attempt"
        );
    }
    tracing::debug!(
        path = %session.path,
        upload_id = %session.upload_id,
        parts = tokens.len(),
        "Multipart session completed"
    );
    Ok(())
}

/// Whether the object at the session's path is the one `tokens` assemble into
async fn already_completed(
    transport: &dyn Transport,
    config: &Arc<TransportConfig>,
    session: &MultipartSession,
    tokens: &[String],
) -> bool {
    let Some(expected) = checksum::multipart_etag(tokens) else {
        return false;
    };
    let mut head = RequestContext::head(config, &HeadTarget::new(session.path.clone()));
    if let Err(e) = head.execute(transport).await {
        tracing::debug!(path = %session.path, error = %e, "Cannot check completed object");
        return false;
    }
    head.response_headers()
        .etag()
        .is_some_and(|etag| etag.eq_ignore_ascii_case(&expected))
}

/// Abandon a session and release the parts stored so far
pub async fn abort(
    transport: &dyn Transport,
    config: &Arc<TransportConfig>,
    path: &ObjectPath,
    upload_id: &str,
) -> Result<()> {
    let mut exchange = abort_request(config, path, upload_id);
    exchange.execute(transport).await?;
    tracing::info!(path = %path, upload_id = %upload_id, "Multipart session aborted");
    Ok(())
}
