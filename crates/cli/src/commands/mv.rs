//! mv command - Rename an object
//!
//! Copies the object server-side (in parallel part copies when it is
//! large), keeping its content type and user metadata, then deletes the
//! source.

use clap::Args;
use serde::Serialize;

use bfs_core::{Error, HeaderTable, ObjectInfo, ObjectStore as _};

use super::{Globals, object_path};
use crate::exit_code::ExitCode;
use crate::output::Spinner;

/// Rename an object
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Source object path
    pub source: String,

    /// Destination object path
    pub target: String,

    /// Keep the source object (copy only)
    #[arg(long)]
    pub keep: bool,
}

#[derive(Debug, Serialize)]
struct MvOutput {
    source: String,
    target: String,
    size_bytes: u64,
    multipart: bool,
    source_deleted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    abandoned_uploads: Vec<String>,
}

/// Execute the mv command
pub async fn execute(args: MvArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let (from, to) = match (object_path(&args.source), object_path(&args.target)) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(e), _) | (_, Err(e)) => return formatter.fail("Invalid path", &e),
    };
    if from == to {
        formatter.error("Source and destination are the same object");
        return ExitCode::UsageError;
    }

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let info = match client.head_object(&from).await {
        Ok(info) => info,
        Err(e) => return formatter.fail(&format!("Failed to stat {from}"), &e),
    };
    let meta = carried_metadata(&info);

    let spinner = Spinner::start(&globals.output, &format!("Copying {from} -> {to}"));
    let mut abandoned = Vec::new();
    let multipart = match client
        .multipart_rename(&from, &to, &meta, info.size_bytes)
        .await
    {
        Ok(report) => {
            formatter.open_sessions(to.as_str(), &report.abandoned);
            abandoned = report.abandoned;
            true
        }
        Err(Error::MultipartRejected { .. }) => match client.copy_object(&from, &to, &meta).await {
            Ok(()) => false,
            Err(e) => return formatter.fail(&format!("Failed to copy {from}"), &e),
        },
        Err(e) => return formatter.fail(&format!("Failed to copy {from}"), &e),
    };

    if !args.keep {
        spinner.set_message(&format!("Removing {from}"));
        if let Err(e) = client.delete_object(&from).await {
            return formatter.fail(&format!("Copied, but failed to remove {from}"), &e);
        }
    }
    spinner.finish();

    if formatter.is_json() {
        formatter.json(&MvOutput {
            source: from.to_string(),
            target: to.to_string(),
            size_bytes: info.size_bytes,
            multipart,
            source_deleted: !args.keep,
            abandoned_uploads: abandoned,
        });
    } else {
        formatter.success(&format!("{from} -> {to}"));
    }
    ExitCode::Success
}

/// Headers that must be resent for the copy to keep the object's identity
fn carried_metadata(info: &ObjectInfo) -> HeaderTable {
    let mut meta: HeaderTable = info.headers.user_metadata().collect();
    if let Some(ct) = &info.content_type {
        meta.insert("content-type", ct.as_str());
    }
    meta
}
