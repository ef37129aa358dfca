//! abort command - Abort a multipart session

use clap::Args;
use serde::Serialize;

use bfs_core::ObjectStore as _;

use super::{Globals, object_path};
use crate::exit_code::ExitCode;

/// Abort a multipart session and release its parts
#[derive(Args, Debug)]
pub struct AbortArgs {
    /// Object path the session was uploading to
    pub path: String,

    /// Upload id, as printed by a failed transfer or `bfs uploads`
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
struct AbortOutput {
    path: String,
    upload_id: String,
    aborted: bool,
}

/// Execute the abort command
pub async fn execute(args: AbortArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let path = match object_path(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid path", &e),
    };
    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    match client.abort_multipart(&path, &args.upload_id).await {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AbortOutput {
                    path: path.to_string(),
                    upload_id: args.upload_id,
                    aborted: true,
                });
            } else {
                formatter.success(&format!("Aborted session {} for {path}", args.upload_id));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to abort session {}", args.upload_id), &e),
    }
}
