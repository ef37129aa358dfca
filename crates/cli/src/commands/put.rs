//! put command - Upload a local file
//!
//! Files that span more than one part go through a parallel multipart
//! upload; smaller files are sent in a single request.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use bfs_core::{Error, HeaderTable, ObjectStore as _};

use super::{Globals, object_path};
use crate::exit_code::ExitCode;
use crate::output::Spinner;

/// Upload a local file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local source file
    pub source: PathBuf,

    /// Object path inside the bucket
    pub path: String,

    /// Content type (default: looked up from the file extension)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL (default: the configured one)
    #[arg(long)]
    pub acl: Option<String>,

    /// User metadata as KEY=VALUE, stored as x-amz-meta-KEY
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub meta: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    source: String,
    path: String,
    size_bytes: u64,
    multipart: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    abandoned_uploads: Vec<String>,
}

/// Execute the put command
pub async fn execute(args: PutArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let path = match object_path(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid path", &e),
    };
    let meta = match build_metadata(&args) {
        Ok(m) => m,
        Err(e) => return formatter.fail("Invalid metadata", &e),
    };

    let file = match File::open(&args.source) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            return formatter.fail(
                &format!("Failed to open {}", args.source.display()),
                &Error::from(e),
            );
        }
    };
    let size = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => return formatter.fail("Failed to read file size", &Error::from(e)),
    };

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let spinner = Spinner::start(&globals.output, &format!("Uploading {path}"));
    let mut abandoned = Vec::new();
    let multipart = match client.multipart_upload(&path, &meta, file.clone()).await {
        Ok(report) => {
            formatter.open_sessions(path.as_str(), &report.abandoned);
            abandoned = report.abandoned;
            true
        }
        Err(Error::MultipartRejected { .. }) => {
            tracing::debug!(path = %path, size, "Single request upload");
            match client.put_object(&path, &meta, file).await {
                Ok(()) => false,
                Err(e) => return formatter.fail(&format!("Failed to upload {path}"), &e),
            }
        }
        Err(e) => return formatter.fail(&format!("Failed to upload {path}"), &e),
    };
    spinner.finish();

    if formatter.is_json() {
        formatter.json(&PutOutput {
            source: args.source.display().to_string(),
            path: path.to_string(),
            size_bytes: size,
            multipart,
            abandoned_uploads: abandoned,
        });
    } else {
        formatter.success(&format!(
            "{} -> {path} ({})",
            args.source.display(),
            humansize::format_size(size, humansize::BINARY)
        ));
    }
    ExitCode::Success
}

fn build_metadata(args: &PutArgs) -> bfs_core::Result<HeaderTable> {
    let mut meta = HeaderTable::new();
    if let Some(ct) = &args.content_type {
        meta.insert("content-type", ct.as_str());
    }
    if let Some(acl) = &args.acl {
        meta.insert("x-amz-acl", acl.as_str());
    }
    for pair in &args.meta {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::General(format!("expected KEY=VALUE, got '{pair}'")));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::General(format!("empty metadata key in '{pair}'")));
        }
        meta.insert(format!("x-amz-meta-{key}"), value);
    }
    Ok(meta)
}
