//! get command - Download an object
//!
//! Writes the object (or a byte range of it) into a local file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use bfs_core::ObjectStore as _;

use super::{Globals, object_path};
use crate::exit_code::ExitCode;

/// Download an object into a local file
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Object path inside the bucket
    pub path: String,

    /// Local destination file
    pub target: PathBuf,

    /// First byte of the object to fetch
    #[arg(long, requires = "length")]
    pub offset: Option<u64>,

    /// Number of bytes to fetch
    #[arg(long, requires = "offset")]
    pub length: Option<u64>,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    path: String,
    target: String,
    bytes_written: u64,
}

/// Execute the get command
pub async fn execute(args: GetArgs, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();

    let path = match object_path(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid path", &e),
    };
    let range = args.offset.zip(args.length);

    let client = match globals.client(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(range.is_none())
        .open(&args.target)
    {
        Ok(f) => Arc::new(f),
        Err(e) => {
            return formatter.fail(
                &format!("Failed to open {}", args.target.display()),
                &bfs_core::Error::from(e),
            );
        }
    };

    // A ranged read lands at the same offset in the local file
    let file_offset = range.map(|(start, _)| start).unwrap_or(0);
    match client.get_object(&path, file, file_offset, range).await {
        Ok(bytes_written) => {
            if formatter.is_json() {
                formatter.json(&GetOutput {
                    path: path.to_string(),
                    target: args.target.display().to_string(),
                    bytes_written,
                });
            } else {
                formatter.success(&format!(
                    "{path} -> {} ({})",
                    args.target.display(),
                    humansize::format_size(bytes_written, humansize::BINARY)
                ));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to download {path}"), &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Cli;
    use crate::commands::Commands;
    use clap::Parser;

    #[test]
    fn test_range_needs_both_bounds() {
        assert!(Cli::try_parse_from(["bfs", "get", "/a", "out", "--offset", "10"]).is_err());

        let cli =
            Cli::try_parse_from(["bfs", "get", "/a", "out", "--offset", "10", "--length", "5"])
                .unwrap();
        match cli.command {
            Commands::Get(args) => assert_eq!(args.offset.zip(args.length), Some((10, 5))),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
