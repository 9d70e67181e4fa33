//! Shared CLI type definitions for edictl build and runtime.
//!
//! `build.rs` renders the man page from these types and the binary parses
//! its arguments with them, so both always describe the same surface.

// Clap and OrthoConfig derive macros inject generated code throughout the
// module; there is no narrower scope to place these on.
#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![expect(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]

use std::ffi::OsString;

use clap::{Args, Command, Parser, Subcommand};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

/// Default pipeline root.
pub const DEFAULT_ROOT: &str = ".";
/// Default receiver host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default receiver port.
pub const DEFAULT_PORT: u16 = 2575;
/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Default attempt budget per document.
pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Default pause between attempts in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Connection, retry and storage settings shared by every command.
///
/// Values layer as defaults, then `.edictl.toml`, then `EDICTL_*`
/// environment variables, then command-line flags.
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
#[ortho_config(prefix = "EDICTL_")]
pub struct AppConfig {
    /// Pipeline root holding the state directories.
    #[ortho_config(default = DEFAULT_ROOT.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_ROOT))]
    pub root: String,
    /// Receiver host name or address.
    #[ortho_config(default = DEFAULT_HOST.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_HOST))]
    pub host: String,
    /// Receiver TCP port.
    #[ortho_config(default = DEFAULT_PORT)]
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Per-attempt timeout covering connect, handshake, send and ACK.
    #[ortho_config(default = DEFAULT_TIMEOUT_SECS)]
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Delivery attempts per document.
    #[ortho_config(default = DEFAULT_ATTEMPTS)]
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
    pub attempts: u32,
    /// Pause between failed attempts, in milliseconds.
    #[ortho_config(default = DEFAULT_BACKOFF_MS)]
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,
    /// Wrap the connection in TLS.
    #[ortho_config(default = false)]
    #[arg(long, default_value_t = false)]
    pub tls: bool,
    /// PEM file of trust anchors replacing the bundled web roots.
    #[arg(long)]
    pub ca_file: Option<String>,
}

/// Arguments for `queue`.
#[derive(Args, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QueueArgs {
    /// Document to promote into Ready.
    pub file: String,
    /// Overwrite a document of the same name already in the pipeline.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `worker`.
#[derive(Args, Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Do not copy sent documents into the archive.
    #[arg(long)]
    pub no_archive: bool,
}

/// CLI subcommands exposed by `edictl`.
#[derive(Subcommand, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Check a document, or every document in a directory, for EDIFACT markers.
    Validate {
        /// File or directory to check.
        path: String,
    },
    /// Validate a document and copy it into Ready.
    Queue(QueueArgs),
    /// Validate and deliver a single document, then move it to sent or failed.
    #[command(name = "send-one")]
    SendOne {
        /// Document to deliver.
        file: String,
    },
    /// Deliver every document currently in Ready.
    Worker(WorkerArgs),
    /// Print each state directory with its documents and metadata.
    List,
}

/// Top-level CLI entry point consumed by the binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "edictl", version, about = "EDIFACT document pipeline with MLLP delivery")]
pub struct Cli {
    /// Application configuration.
    #[command(flatten)]
    pub config: AppConfig,
    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Return the leading arguments that belong to [`AppConfig`].
///
/// The first element (the program name) is kept. Collection stops at the
/// first positional token, which is the subcommand; flags that take a value
/// in the following token consume it. The result can be handed to
/// `AppConfig::load_from_iter` to layer files and environment under the
/// flags the operator actually typed.
#[must_use]
pub fn global_args<I, T>(argv: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let valued: Vec<String> = AppConfig::augment_args(Command::new("edictl"))
        .get_arguments()
        .filter(|arg| arg.get_action().takes_values())
        .filter_map(|arg| arg.get_long().map(|long| format!("--{long}")))
        .collect();

    let mut argv = argv.into_iter().map(Into::into);
    let mut globals: Vec<OsString> = argv.next().into_iter().collect();
    while let Some(token) = argv.next() {
        let Some(text) = token.to_str() else {
            break;
        };
        if !text.starts_with('-') || text == "--" {
            break;
        }
        let wants_value = !text.contains('=') && valued.iter().any(|v| v == text);
        globals.push(token);
        if wants_value {
            match argv.next() {
                Some(value) => globals.push(value),
                None => break,
            }
        }
    }
    globals
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_apply_without_overrides() {
        Jail::expect_with(|_j| {
            let cfg = AppConfig::load_from_iter(["edictl"]).expect("load");
            assert_eq!(cfg.root, DEFAULT_ROOT);
            assert_eq!(cfg.host, DEFAULT_HOST);
            assert_eq!(cfg.port, DEFAULT_PORT);
            assert_eq!(cfg.attempts, DEFAULT_ATTEMPTS);
            assert!(!cfg.tls);
            assert_eq!(cfg.ca_file, None);
            Ok(())
        });
    }

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("EDICTL_HOST", "edi.example.net");
            j.set_env("EDICTL_PORT", "6661");
            let cfg = AppConfig::load_from_iter(["edictl"]).expect("load");
            assert_eq!(cfg.host, "edi.example.net");
            assert_eq!(cfg.port, 6661);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("EDICTL_ATTEMPTS", "7");
            let cfg = AppConfig::load_from_iter(["edictl", "--attempts", "2"]).expect("load");
            assert_eq!(cfg.attempts, 2);
            Ok(())
        });
    }

    #[rstest]
    fn loads_from_dotfile() {
        Jail::expect_with(|j| {
            j.create_file(".edictl.toml", "root = \"/srv/edi\"\nbackoff_ms = 250")?;
            let cfg = AppConfig::load_from_iter(["edictl"]).expect("load");
            assert_eq!(cfg.root, "/srv/edi");
            assert_eq!(cfg.backoff_ms, 250);
            Ok(())
        });
    }

    #[rstest]
    #[case(&["edictl", "list"], &["edictl"])]
    #[case(&["edictl", "--port", "9", "worker", "--no-archive"], &["edictl", "--port", "9"])]
    #[case(&["edictl", "--tls", "--host=h", "send-one", "a.edi"], &["edictl", "--tls", "--host=h"])]
    #[case(
        &["edictl", "--ca-file", "ca.pem", "--tls", "queue", "--force", "x"],
        &["edictl", "--ca-file", "ca.pem", "--tls"]
    )]
    fn global_args_stop_at_subcommand(#[case] argv: &[&str], #[case] expected: &[&str]) {
        let globals = global_args(argv.iter().copied());
        let expected: Vec<OsString> = expected.iter().map(OsString::from).collect();
        assert_eq!(globals, expected);
    }

    #[rstest]
    fn parses_queue_with_force() {
        let cli = Cli::parse_from(["edictl", "--root", "/tmp/p", "queue", "--force", "a.edi"]);
        assert_eq!(cli.config.root, "/tmp/p");
        assert_eq!(
            cli.command,
            Commands::Queue(QueueArgs {
                file: "a.edi".to_owned(),
                force: true,
            })
        );
    }

    #[rstest]
    fn parses_send_one() {
        let cli = Cli::parse_from(["edictl", "send-one", "b.edi"]);
        assert_eq!(
            cli.command,
            Commands::SendOne {
                file: "b.edi".to_owned()
            }
        );
        assert_eq!(cli.config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }
}
