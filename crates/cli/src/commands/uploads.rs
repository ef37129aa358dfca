//! uploads command - List leaked multipart sessions
//!
//! A failed multipart transfer leaves its session open on the provider and
//! its parts keep using storage until the session is aborted.

use clap::Args;

use bfs_core::ObjectStore as _;

use super::Globals;
use crate::exit_code::ExitCode;

/// List multipart sessions that were never completed
#[derive(Args, Debug)]
pub struct UploadsArgs {
    /// Only show sessions whose key starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Execute the uploads command
pub async fn execute(args: UploadsArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();
    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let mut uploads = match client.list_multipart_uploads().await {
        Ok(u) => u,
        Err(e) => return formatter.fail("Failed to list multipart sessions", &e),
    };
    if let Some(prefix) = args.prefix.as_deref().map(|p| p.trim_start_matches('/')) {
        uploads.retain(|u| u.key.starts_with(prefix));
    }

    if formatter.is_json() {
        formatter.json(&uploads);
        return ExitCode::Success;
    }
    for upload in &uploads {
        let initiated = upload
            .initiated
            .map(|t| t.strftime("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        formatter.println(&format!("{initiated:>20}  {}  /{}", upload.upload_id, upload.key));
    }
    formatter.println(&format!("Total: {} sessions", uploads.len()));
    ExitCode::Success
}
