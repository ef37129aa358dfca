//! ObjectStore trait definition
//!
//! The narrow surface the filesystem layer uses to reach the object store.
//! Every method takes object paths inside the configured bucket and, for
//! transfers, a descriptor the caller already opened; the engine never opens
//! or resolves local paths itself.

use std::fs::File;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::headers::HeaderTable;
use crate::path::ObjectPath;

/// A caller-owned open file shared with in-flight exchanges
pub type Descriptor = Arc<File>;

/// Metadata for an object, built from HEAD response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object path
    pub path: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// Human-readable size
    pub size_human: String,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    /// ETag without quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Storage class, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// All response headers, including `x-amz-meta-*`
    pub headers: HeaderTable,
}

impl ObjectInfo {
    /// Build from the headers of a HEAD (or GET) response
    pub fn from_headers(path: &ObjectPath, headers: HeaderTable) -> Self {
        let size_bytes = headers.content_length().unwrap_or(0);
        let last_modified = headers.get("last-modified").and_then(|v| {
            jiff::fmt::rfc2822::DateTimeParser::new()
                .parse_timestamp(v)
                .ok()
        });
        Self {
            path: path.to_string(),
            size_bytes,
            size_human: humansize::format_size(size_bytes, humansize::BINARY),
            last_modified,
            etag: headers.etag().map(str::to_string),
            content_type: headers.get("content-type").map(str::to_string),
            storage_class: headers.get("x-amz-storage-class").map(str::to_string),
            headers,
        }
    }
}

/// One HEAD in a batch, tagged with the caller's bookkeeping paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadTarget {
    /// Object to query
    pub path: ObjectPath,
    /// Directory the caller is listing
    pub base_path: Option<String>,
    /// Cache key the caller stores the result under
    pub saved_path: Option<String>,
}

impl HeadTarget {
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            base_path: None,
            saved_path: None,
        }
    }

    pub fn with_paths(mut self, base_path: impl Into<String>, saved_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self.saved_path = Some(saved_path.into());
        self
    }
}

/// Result of one HEAD in a batch
#[derive(Debug)]
pub struct HeadEntry {
    pub target: HeadTarget,
    pub result: Result<ObjectInfo>,
}

/// One object in a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub key: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Result of a list operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResult {
    /// Listed objects
    pub items: Vec<ListEntry>,

    /// Grouped key prefixes ("directories")
    pub common_prefixes: Vec<String>,

    /// Whether the result is truncated (more items available)
    pub truncated: bool,

    /// Marker for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

/// Options for list operations
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Prefix to filter by
    pub prefix: Option<String>,

    /// Delimiter for grouping (usually "/")
    pub delimiter: Option<String>,

    /// Start listing after this key
    pub marker: Option<String>,

    /// Maximum number of keys to return per request
    pub max_keys: Option<u32>,
}

impl ListOptions {
    /// Query pairs in the order they are sent
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(d) = &self.delimiter {
            query.push(("delimiter", d.clone()));
        }
        if let Some(m) = &self.marker {
            query.push(("marker", m.clone()));
        }
        if let Some(n) = self.max_keys {
            query.push(("max-keys", n.to_string()));
        }
        if let Some(p) = &self.prefix {
            query.push(("prefix", p.clone()));
        }
        query
    }
}

/// An in-progress multipart session known to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated: Option<jiff::Timestamp>,
}

/// Outcome of a finished multipart sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartReport {
    /// Session that materialized the object
    pub upload_id: String,
    pub parts: usize,
    /// Part exchanges resubmitted after a retryable failure
    pub retried: usize,
    /// Earlier sessions given up on after the provider lost or refused them.
    /// They may still hold parts; abort them to release the storage.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abandoned: Vec<String>,
}

/// Entry points consumed by the filesystem layer
///
/// Implemented by the S3 transport and mockable for testing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that the bucket exists and the credentials are accepted
    async fn check_bucket(&self) -> Result<()>;

    /// Get object metadata
    async fn head_object(&self, path: &ObjectPath) -> Result<ObjectInfo>;

    /// Get metadata for many objects concurrently; each entry carries its own result
    async fn head_objects(&self, targets: Vec<HeadTarget>) -> Result<Vec<HeadEntry>>;

    /// Download an object (or `range = (start, size)` of it) into `file` at `file_offset`.
    /// Returns the number of bytes written.
    async fn get_object(
        &self,
        path: &ObjectPath,
        file: Descriptor,
        file_offset: u64,
        range: Option<(u64, u64)>,
    ) -> Result<u64>;

    /// Upload the whole content of `file` in a single request
    async fn put_object(&self, path: &ObjectPath, meta: &HeaderTable, file: Descriptor) -> Result<()>;

    /// Replace an object's metadata without transferring its data
    async fn put_object_metadata(&self, path: &ObjectPath, meta: &HeaderTable) -> Result<()>;

    /// Server-side copy of an object below the multipart threshold
    async fn copy_object(&self, from: &ObjectPath, to: &ObjectPath, meta: &HeaderTable) -> Result<()>;

    /// Delete an object
    async fn delete_object(&self, path: &ObjectPath) -> Result<()>;

    /// List objects in the bucket
    async fn list_bucket(&self, options: &ListOptions) -> Result<ListResult>;

    /// List multipart sessions that were started but never completed or aborted
    async fn list_multipart_uploads(&self) -> Result<Vec<MultipartUploadInfo>>;

    /// Upload `file` in parallel parts; rejected for files that fit in one part
    async fn multipart_upload(
        &self,
        path: &ObjectPath,
        meta: &HeaderTable,
        file: Descriptor,
    ) -> Result<MultipartReport>;

    /// Copy `from` to `to` in parallel server-side part copies; the source is kept
    async fn multipart_rename(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
        meta: &HeaderTable,
        size: u64,
    ) -> Result<MultipartReport>;

    /// Abort a multipart session and release its stored parts
    async fn abort_multipart(&self, path: &ObjectPath, upload_id: &str) -> Result<()>;
}
