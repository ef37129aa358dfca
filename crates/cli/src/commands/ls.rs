//! ls command - List objects
//!
//! Lists the objects and common prefixes below a directory path, following
//! truncated listings until the bucket reports no more keys.

use clap::Args;
use serde::Serialize;

use bfs_core::{ListEntry, ListOptions, ObjectStore as _};

use super::{Globals, object_path};
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// List objects
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Directory path inside the bucket
    #[arg(default_value = "/")]
    pub path: String,

    /// List every key below the path instead of one level
    #[arg(short, long)]
    pub recursive: bool,

    /// Keys requested per listing page
    #[arg(long, default_value_t = 1000)]
    pub page_size: u32,

    /// Summarize output (show totals only)
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ListEntry>,
    prefixes: Vec<String>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_objects: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

/// Execute the ls command
pub async fn execute(args: LsArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let path = match object_path(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid path", &e),
    };

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let mut options = list_options(path.key(), args.recursive, args.page_size);
    let mut items = Vec::new();
    let mut prefixes = Vec::new();
    loop {
        let page = match client.list_bucket(&options).await {
            Ok(page) => page,
            Err(e) => return formatter.fail(&format!("Failed to list {path}"), &e),
        };
        items.extend(page.items);
        prefixes.extend(page.common_prefixes);
        match page.next_marker {
            Some(marker) if page.truncated => options.marker = Some(marker),
            _ => break,
        }
    }

    let total_size_bytes = items.iter().map(|i| i.size_bytes).sum();
    let summary = Summary {
        total_objects: items.len(),
        total_size_bytes,
        total_size_human: humansize::format_size(total_size_bytes, humansize::BINARY),
    };

    if formatter.is_json() {
        formatter.json(&LsOutput {
            items,
            prefixes,
            summary,
        });
    } else {
        if !args.summarize {
            print_listing(&formatter, &items, &prefixes);
        }
        formatter.println(&format!(
            "Total: {} objects, {}",
            summary.total_objects, summary.total_size_human
        ));
    }
    ExitCode::Success
}

/// Listing options for the directory holding `key`
fn list_options(key: &str, recursive: bool, page_size: u32) -> ListOptions {
    let prefix = match key.trim_end_matches('/') {
        "" => None,
        dir => Some(format!("{dir}/")),
    };
    ListOptions {
        prefix,
        delimiter: (!recursive).then(|| "/".to_string()),
        marker: None,
        max_keys: Some(page_size),
    }
}

fn print_listing(formatter: &Formatter, items: &[ListEntry], prefixes: &[String]) {
    for prefix in prefixes {
        formatter.println(&format!("{:>20} {:>10}  {prefix}", "", "PRE"));
    }
    for item in items {
        let date = item
            .last_modified
            .map(|d| d.strftime("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        formatter.println(&format!(
            "{date:>20} {:>10}  {}",
            humansize::format_size(item.size_bytes, humansize::BINARY),
            item.key
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_for_root() {
        let options = list_options("", false, 1000);
        assert_eq!(options.prefix, None);
        assert_eq!(options.delimiter.as_deref(), Some("/"));
        assert_eq!(options.max_keys, Some(1000));
    }

    #[test]
    fn test_list_options_for_directory() {
        let options = list_options("photos/2024", false, 50);
        assert_eq!(options.prefix.as_deref(), Some("photos/2024/"));

        let options = list_options("photos/2024/", true, 50);
        assert_eq!(options.prefix.as_deref(), Some("photos/2024/"));
        assert_eq!(options.delimiter, None);
    }
}
