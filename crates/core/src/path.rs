//! Object paths and request targets
//!
//! The filesystem layer names objects by absolute paths inside the mounted
//! bucket (`/dir/file.txt`). Every exchange needs two renderings of such a
//! path: the canonical resource that gets signed (`/bucket/dir/file.txt`) and
//! the URL the request is sent to. Both use the same percent-encoding so the
//! signed resource always matches the request line.

use crate::error::{Error, Result};

/// A validated absolute object path inside the bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Parse an absolute path; `/` is the bucket root.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(Error::InvalidPath("Path cannot be empty".into()));
        }
        if !path.starts_with('/') {
            return Err(Error::InvalidPath(format!(
                "Path '{path}' must be absolute (start with '/')"
            )));
        }
        if path.contains('\0') {
            return Err(Error::InvalidPath(format!("Path '{path}' contains NUL")));
        }
        Ok(Self(path))
    }

    /// The bucket root
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object key without the leading slash
    pub fn key(&self) -> &str {
        &self.0[1..]
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Last path component
    pub fn file_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// Signed resource and destination URL for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResource {
    /// Canonical resource: `/<bucket><encoded path>[?sub-resource]`
    pub resource: String,
    /// Request URL: `<endpoint>/<bucket><encoded path>[?sub-resource][&query]`
    pub url: String,
}

impl UrlResource {
    /// Build the resource and URL for `path` in `bucket` at `endpoint`.
    pub fn new(endpoint: &str, bucket: &str, path: &ObjectPath) -> Self {
        let encoded = url_encode_path(path.as_str());
        let endpoint = endpoint.trim_end_matches('/');
        Self {
            resource: format!("/{bucket}{encoded}"),
            url: format!("{endpoint}/{bucket}{encoded}"),
        }
    }

    /// Append a signed sub-resource such as `uploads` or `partNumber=1&uploadId=x`.
    pub fn with_sub_resource(mut self, sub_resource: &str) -> Self {
        if !sub_resource.is_empty() {
            self.resource = format!("{}?{sub_resource}", self.resource);
            self.url = format!("{}?{sub_resource}", self.url);
        }
        self
    }

    /// Append unsigned query parameters (list prefix, marker, ...) to the URL only.
    pub fn with_query(mut self, query: &[(&str, String)]) -> Self {
        if query.is_empty() {
            return self;
        }
        let rendered = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sep = if self.url.contains('?') { '&' } else { '?' };
        self.url = format!("{}{sep}{rendered}", self.url);
        self
    }
}

/// Percent-encode each path segment, keeping `/` separators.
pub fn url_encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
