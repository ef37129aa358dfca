//! rm command - Remove objects
//!
//! Removes one or more objects, or every object under a prefix with
//! `--recursive`.

use clap::Args;
use serde::Serialize;

use bfs_core::{ListOptions, ObjectPath, ObjectStore as _};
use bfs_s3::S3Client;

use super::{Globals, object_path};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object path(s) to remove
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove every object whose key starts with the given path
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore objects that do not exist
    #[arg(short, long)]
    pub force: bool,

    /// Only show what would be deleted (dry run)
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
    total: usize,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let mut paths = Vec::with_capacity(args.paths.len());
    for arg in &args.paths {
        match object_path(arg) {
            Ok(p) if p.is_root() && !args.recursive => {
                formatter.error("Refusing to remove the bucket root without --recursive");
                return ExitCode::UsageError;
            }
            Ok(p) => paths.push(p),
            Err(e) => return formatter.fail("Invalid path", &e),
        }
    }

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let mut targets = Vec::new();
    for path in paths {
        if args.recursive {
            match expand_prefix(&client, &path).await {
                Ok(found) => targets.extend(found),
                Err(e) => return formatter.fail(&format!("Failed to list {path}"), &e),
            }
        } else {
            targets.push(path);
        }
    }

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut exit = ExitCode::Success;
    for path in targets {
        if args.dry_run {
            formatter.println(&format!("Would remove: {path}"));
            deleted.push(path.to_string());
            continue;
        }
        match client.delete_object(&path).await {
            Ok(()) => deleted.push(path.to_string()),
            Err(e) if args.force && e.is_not_found() => {}
            Err(e) => {
                exit = formatter.fail(&format!("Failed to remove {path}"), &e);
                failed.push(path.to_string());
            }
        }
    }

    report(&formatter, deleted, failed, args.dry_run);
    exit
}

/// Every object below `path`, following truncated listings
async fn expand_prefix(client: &S3Client, path: &ObjectPath) -> bfs_core::Result<Vec<ObjectPath>> {
    let mut options = ListOptions {
        prefix: Some(path.key().to_string()).filter(|p| !p.is_empty()),
        ..Default::default()
    };
    let mut found = Vec::new();
    loop {
        let page = client.list_bucket(&options).await?;
        for item in &page.items {
            found.push(ObjectPath::new(format!("/{}", item.key))?);
        }
        match page.next_marker {
            Some(marker) if page.truncated => options.marker = Some(marker),
            _ => break,
        }
    }
    Ok(found)
}

fn report(formatter: &Formatter, deleted: Vec<String>, failed: Vec<String>, dry_run: bool) {
    let total = deleted.len() + failed.len();
    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if failed.is_empty() { "success" } else { "partial" },
            deleted,
            failed,
            total,
        });
    } else if !dry_run {
        for path in &deleted {
            formatter.success(&format!("Removed {path}"));
        }
    }
}
