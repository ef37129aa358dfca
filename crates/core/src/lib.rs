//! bfs-core: Core library for the bucketfs transport engine
//!
//! This crate provides the vocabulary shared by the transport engine and its
//! callers, including:
//! - Error classification (retry, errno, exit code)
//! - Immutable transport configuration
//! - The growable byte buffer used to capture responses
//! - Object paths, signed resources and request URLs
//! - The ObjectStore trait the filesystem layer calls into
//!
//! It has no HTTP dependency, so callers can be tested against a mock store.

pub mod buffer;
pub mod config;
pub mod error;
pub mod headers;
pub mod mime;
pub mod path;
pub mod traits;

pub use buffer::ByteBuffer;
pub use config::{Config, ConfigManager, RetryConfig, TimeoutConfig, TransportConfig};
pub use error::{Error, Result};
pub use headers::HeaderTable;
pub use mime::MimeTable;
pub use path::{ObjectPath, UrlResource};
pub use traits::{
    Descriptor, HeadEntry, HeadTarget, ListEntry, ListOptions, ListResult, MultipartReport,
    MultipartUploadInfo, ObjectInfo, ObjectStore,
};
