//! Configuration commands
//!
//! Writes and displays the TOML file the transport configuration is loaded
//! from. The secret key is never printed.

use clap::Subcommand;
use serde::Serialize;

use bfs_core::{Config, TransportConfig};

use super::Globals;
use crate::exit_code::ExitCode;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Create or replace the configuration file
    Init(InitArgs),

    /// Show the active configuration (without the secret key)
    Show,
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Service endpoint URL (e.g. "http://localhost:9000")
    #[arg(long)]
    pub endpoint: String,

    /// Bucket projected as the filesystem root
    #[arg(long)]
    pub bucket: String,

    /// Access key ID
    #[arg(long, env = "BFS_ACCESS_KEY", default_value = "")]
    pub access_key: String,

    /// Secret access key
    #[arg(long, env = "BFS_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub secret_key: String,

    /// Send unsigned requests
    #[arg(long)]
    pub public_bucket: bool,

    /// Send Content-MD5 and verify part ETags
    #[arg(long)]
    pub content_md5: bool,

    /// Maximum concurrently open part transfers
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Multipart part size in MiB
    #[arg(long)]
    pub part_size_mib: Option<u64>,
}

/// Configuration as shown to the user
#[derive(Debug, Serialize)]
struct ConfigView {
    path: String,
    endpoint: String,
    bucket: String,
    access_key: String,
    public_bucket: bool,
    default_acl: String,
    content_md5: bool,
    max_parallel_upload: usize,
    multipart_size: u64,
    copy_part_size: u64,
    max_attempts: u32,
}

impl ConfigView {
    fn new(path: String, transport: &TransportConfig) -> Self {
        Self {
            path,
            endpoint: transport.endpoint.clone(),
            bucket: transport.bucket.clone(),
            access_key: transport.access_key.clone(),
            public_bucket: transport.public_bucket,
            default_acl: transport.default_acl.clone(),
            content_md5: transport.content_md5,
            max_parallel_upload: transport.max_parallel_upload,
            multipart_size: transport.multipart_size,
            copy_part_size: transport.copy_part_size,
            max_attempts: transport.retry.max_attempts,
        }
    }
}

pub fn execute(cmd: ConfigCommands, globals: &Globals) -> ExitCode {
    let formatter = globals.formatter();
    let manager = match globals.config_manager() {
        Ok(m) => m,
        Err(e) => return formatter.fail("Failed to locate configuration", &e),
    };

    match cmd {
        ConfigCommands::Init(args) => {
            let transport = build_transport(args);
            if let Err(e) = transport.validate() {
                return formatter.fail("Invalid configuration", &e);
            }
            if let Err(e) = manager.save(&Config::new(transport)) {
                return formatter.fail("Failed to save configuration", &e);
            }
            formatter.success(&format!(
                "Configuration written to {}",
                manager.config_path().display()
            ));
            ExitCode::Success
        }
        ConfigCommands::Show => {
            let config = match manager.load() {
                Ok(c) => c,
                Err(e) => return formatter.fail("Failed to load configuration", &e),
            };
            let view = ConfigView::new(
                manager.config_path().display().to_string(),
                &config.transport,
            );
            if formatter.is_json() {
                formatter.json(&view);
            } else {
                formatter.println(&format!("File      : {}", view.path));
                formatter.println(&format!("Endpoint  : {}", view.endpoint));
                formatter.println(&format!("Bucket    : {}", view.bucket));
                formatter.println(&format!("Access key: {}", view.access_key));
                formatter.println(&format!("Public    : {}", view.public_bucket));
                formatter.println(&format!("Parallel  : {}", view.max_parallel_upload));
                formatter.println(&format!("Part size : {} bytes", view.multipart_size));
                formatter.println(&format!("Attempts  : {}", view.max_attempts));
            }
            ExitCode::Success
        }
    }
}

fn build_transport(args: InitArgs) -> TransportConfig {
    let mut transport =
        TransportConfig::new(args.endpoint, args.bucket, args.access_key, args.secret_key);
    transport.public_bucket = args.public_bucket;
    transport.content_md5 = args.content_md5;
    if let Some(parallel) = args.parallel {
        transport.max_parallel_upload = parallel;
    }
    if let Some(mib) = args.part_size_mib {
        transport.multipart_size = mib * 1024 * 1024;
    }
    transport
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use bfs_core::ConfigManager;
    use tempfile::TempDir;

    fn init_args(part_size_mib: Option<u64>) -> InitArgs {
        InitArgs {
            endpoint: "http://localhost:9000".into(),
            bucket: "photos".into(),
            access_key: "AKID".into(),
            secret_key: "secret".into(),
            public_bucket: false,
            content_md5: true,
            parallel: Some(8),
            part_size_mib,
        }
    }

    fn globals(dir: &TempDir) -> Globals {
        Globals {
            output: OutputConfig {
                quiet: true,
                ..Default::default()
            },
            config: Some(dir.path().join("config.toml")),
        }
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let code = execute(ConfigCommands::Init(init_args(Some(16))), &globals(&dir));
        assert_eq!(code, ExitCode::Success);

        let config = ConfigManager::with_path(dir.path().join("config.toml"))
            .load()
            .unwrap();
        assert_eq!(config.transport.bucket, "photos");
        assert_eq!(config.transport.max_parallel_upload, 8);
        assert_eq!(config.transport.multipart_size, 16 * 1024 * 1024);
        assert!(config.transport.content_md5);
    }

    #[test]
    fn test_init_rejects_tiny_parts() {
        let dir = TempDir::new().unwrap();
        let code = execute(ConfigCommands::Init(init_args(Some(1))), &globals(&dir));
        assert_eq!(code, ExitCode::UsageError);
        assert!(!dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_show_without_file_fails() {
        let dir = TempDir::new().unwrap();
        let code = execute(ConfigCommands::Show, &globals(&dir));
        assert_eq!(code, ExitCode::UsageError);
    }
}
