//! stat command - Show object metadata
//!
//! Displays the metadata returned by a HEAD of one or more objects. Several
//! paths are queried concurrently as one batch.

use clap::Args;
use serde::Serialize;

use bfs_core::{HeadTarget, ObjectInfo, ObjectStore as _};

use super::{Globals, object_path};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Show object metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object paths inside the bucket
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Also print user metadata (x-amz-meta-*)
    #[arg(long)]
    pub meta: bool,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<ObjectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the stat command
pub async fn execute(args: StatArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let mut targets = Vec::with_capacity(args.paths.len());
    for arg in &args.paths {
        match object_path(arg) {
            Ok(path) => targets.push(HeadTarget::new(path)),
            Err(e) => return formatter.fail("Invalid path", &e),
        }
    }

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let entries = if targets.len() == 1 {
        let target = targets.remove(0);
        let result = client.head_object(&target.path).await;
        vec![bfs_core::HeadEntry { target, result }]
    } else {
        match client.head_objects(targets).await {
            Ok(entries) => entries,
            Err(e) => return formatter.fail("Failed to get object metadata", &e),
        }
    };

    let mut exit = ExitCode::Success;
    let mut outputs = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.target.path.to_string();
        match entry.result {
            Ok(info) => {
                if !formatter.is_json() {
                    print_info(&formatter, &info, args.meta);
                }
                outputs.push(StatOutput {
                    path,
                    info: Some(info),
                    error: None,
                });
            }
            Err(e) => {
                exit = formatter.fail(&format!("Failed to stat {path}"), &e);
                outputs.push(StatOutput {
                    path,
                    info: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&outputs);
    }
    exit
}

fn print_info(formatter: &Formatter, info: &ObjectInfo, meta: bool) {
    formatter.println(&format!("Name      : {}", info.path));
    if let Some(modified) = info.last_modified {
        formatter.println(&format!(
            "Date      : {}",
            modified.strftime("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    formatter.println(&format!(
        "Size      : {} ({} bytes)",
        info.size_human, info.size_bytes
    ));
    if let Some(etag) = &info.etag {
        formatter.println(&format!("ETag      : {etag}"));
    }
    if let Some(ct) = &info.content_type {
        formatter.println(&format!("Type      : {ct}"));
    }
    if let Some(sc) = &info.storage_class {
        formatter.println(&format!("Class     : {sc}"));
    }
    if meta {
        for (name, value) in info.headers.user_metadata() {
            formatter.println(&format!("Meta      : {name}={value}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;

    #[tokio::test]
    async fn test_stat_rejects_bad_path_before_loading_config() {
        let globals = Globals {
            output: OutputConfig {
                quiet: true,
                ..Default::default()
            },
            config: Some("/nonexistent/bfs/config.toml".into()),
        };
        let args = StatArgs {
            paths: vec!["bad\0path".into()],
            meta: false,
        };
        assert_eq!(execute(args, &globals).await, ExitCode::UsageError);
    }

    #[tokio::test]
    async fn test_stat_without_config_is_usage_error() {
        let globals = Globals {
            output: OutputConfig {
                quiet: true,
                ..Default::default()
            },
            config: Some("/nonexistent/bfs/config.toml".into()),
        };
        let args = StatArgs {
            paths: vec!["/a".into()],
            meta: false,
        };
        assert_eq!(execute(args, &globals).await, ExitCode::UsageError);
    }
}
