//! Error types for bfs-core
//!
//! One error type is shared by every layer of the transport engine. It carries
//! enough classification for the scheduler to decide on retries, for the
//! filesystem layer to pick an errno, and for the CLI to pick an exit code.

use thiserror::Error;

/// Result type alias for bfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// POSIX error numbers handed back to the filesystem layer.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
}

/// Error types for bfs operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or value error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid object path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// IO error on a local descriptor
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Malformed XML in a response body
    #[error("XML error: {0}")]
    Xml(String),

    /// Connect, DNS, TLS or stalled-transfer failure (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status
    #[error("HTTP {status}: {}{message}", .code.as_deref().map(|c| format!("{c}: ")).unwrap_or_default())]
    Protocol {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Growing a response buffer failed
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Missing or unusable credentials
    #[error("Signature error: {0}")]
    Signature(String),

    /// A part's returned ETag does not match the MD5 of the bytes sent
    #[error("Integrity mismatch for {path} part {part_number}: expected {expected}, received {received}")]
    IntegrityMismatch {
        path: String,
        part_number: u32,
        expected: String,
        received: String,
    },

    /// The object is empty or fits in one part; use a single-request transfer
    #[error("Multipart transfer rejected for {size} bytes with part size {part_size}")]
    MultipartRejected { size: u64, part_size: u64 },

    /// The provider no longer knows the multipart session
    #[error("Multipart session {upload_id} lost")]
    SessionLost { upload_id: String },

    /// A multipart sequence failed; the session is left open for the caller to abort
    #[error("Multipart upload {upload_id} failed: {source}")]
    MultipartFailed {
        upload_id: String,
        /// Earlier sessions of the same sequence that were given up on
        abandoned: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    /// The retry budget for one unit of work ran out
    #[error("Giving up on {path} after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Build a protocol error from a status and an optional provider error body.
    pub fn protocol(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Error::Protocol {
            status,
            code,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            Error::MultipartFailed { source, .. } => source.status(),
            Error::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Whether resubmitting the same exchange may succeed.
    ///
    /// Server-side and throttling statuses are retryable, client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::IntegrityMismatch { .. } => true,
            Error::Protocol { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether a part-level failure means the multipart session itself is gone.
    pub fn is_session_lost(&self) -> bool {
        match self {
            Error::SessionLost { .. } => true,
            Error::Protocol { status: 409, .. } => true,
            Error::Protocol {
                status: 404, code, ..
            } => code.as_deref() == Some("NoSuchUpload"),
            _ => false,
        }
    }

    /// Whether this error means the object (or bucket) does not exist
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// POSIX errno for the filesystem layer (positive value)
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::Config(_) => errno::EINVAL,
            Error::Buffer(_) => errno::ENOMEM,
            Error::Signature(_) => errno::EACCES,
            Error::Transport(_) => errno::EAGAIN,
            Error::MultipartRejected { .. } => errno::EFBIG,
            Error::SessionLost { .. } => errno::EBUSY,
            Error::Protocol { status, .. } => match status {
                400 => errno::EINVAL,
                401 | 403 => errno::EACCES,
                404 => errno::ENOENT,
                409 => errno::EEXIST,
                _ => errno::EIO,
            },
            Error::MultipartFailed { source, .. } => source.errno(),
            Error::RetriesExhausted { last, .. } => last.errno(),
            _ => errno::EIO,
        }
    }

    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::Config(_) => 2, // UsageError
            Error::Transport(_) => 3,                      // NetworkError
            Error::Signature(_) => 4,                      // AuthError
            Error::SessionLost { .. } => 6,                // Conflict
            Error::MultipartFailed { source, .. } => source.exit_code(),
            Error::RetriesExhausted { last, .. } => last.exit_code(),
            Error::Protocol { status, .. } => match status {
                401 | 403 => 4,
                404 => 5,
                409 | 412 => 6,
                _ if self.is_retryable() => 3,
                _ => 1,
            },
            _ => 1, // GeneralError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::InvalidPath("test".into()).exit_code(), 2);
        assert_eq!(Error::Config("test".into()).exit_code(), 2);
        assert_eq!(Error::Transport("test".into()).exit_code(), 3);
        assert_eq!(Error::Signature("test".into()).exit_code(), 4);
        assert_eq!(Error::protocol(404, None, "gone").exit_code(), 5);
        assert_eq!(Error::protocol(409, None, "busy").exit_code(), 6);
        assert_eq!(Error::protocol(503, None, "slow down").exit_code(), 3);
        assert_eq!(Error::General("test".into()).exit_code(), 1);
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::protocol(500, None, "").is_retryable());
        assert!(Error::protocol(503, Some("SlowDown".into()), "").is_retryable());
        assert!(!Error::protocol(403, None, "").is_retryable());
        assert!(!Error::protocol(404, None, "").is_retryable());
        assert!(!Error::Signature("no key".into()).is_retryable());
        assert!(!Error::Buffer("oom".into()).is_retryable());
    }

    #[test]
    fn test_session_lost_classification() {
        assert!(Error::protocol(404, Some("NoSuchUpload".into()), "").is_session_lost());
        assert!(Error::protocol(409, None, "").is_session_lost());
        assert!(!Error::protocol(404, Some("NoSuchKey".into()), "").is_session_lost());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::protocol(404, None, "").errno(), errno::ENOENT);
        assert_eq!(Error::protocol(403, None, "").errno(), errno::EACCES);
        assert_eq!(Error::protocol(500, None, "").errno(), errno::EIO);
        let wrapped = Error::MultipartFailed {
            upload_id: "abc".into(),
            abandoned: Vec::new(),
            source: Box::new(Error::protocol(403, None, "")),
        };
        assert_eq!(wrapped.errno(), errno::EACCES);
    }

    #[test]
    fn test_error_display() {
        let err = Error::protocol(404, Some("NoSuchKey".into()), "The key does not exist");
        assert_eq!(err.to_string(), "HTTP 404: NoSuchKey: The key does not exist");

        let err = Error::InvalidPath("dir/file".into());
        assert_eq!(err.to_string(), "Invalid path: dir/file");
    }
}
