//! Command driver behind the `edictl` binary.
//!
//! Each command turns into a list of report lines so the wording can be
//! tested without capturing stdout; [`dispatch`] prints them.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cli_defs::{AppConfig, Cli, Commands, QueueArgs, WorkerArgs, global_args};
use ortho_config::OrthoConfig;
use tracing::info;

use crate::{
    delivery::Deliverer,
    pipeline::{
        Pipeline,
        PipelineError,
        PipelineState,
        SendOutcome,
        SidecarStatus,
        StateListing,
        index::list_documents,
    },
    settings::RuntimeSettings,
    transport::MllpClient,
    validate::validate,
};

const RULE_WIDTH: usize = 40;

/// Parse arguments, layer configuration and run the requested command.
///
/// # Errors
///
/// Returns any error raised while loading configuration or running the
/// command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from_iter(global_args(std::env::args_os()))
        .context("failed to load configuration")?;
    dispatch(&config, cli.command).await
}

/// Run `command` against `config` and print its report.
///
/// # Errors
///
/// Returns an error for unusable settings, conflicts, unreadable inputs and
/// pipeline I/O failures.
#[expect(clippy::print_stdout, reason = "command reports are written for the operator")]
pub async fn dispatch(config: &AppConfig, command: Commands) -> Result<()> {
    let settings = RuntimeSettings::from_config(config).context("invalid configuration")?;
    for line in execute(&settings, command).await? {
        println!("{line}");
    }
    Ok(())
}

/// Run `command` and return the report lines.
///
/// # Errors
///
/// See [`dispatch`].
pub async fn execute(settings: &RuntimeSettings, command: Commands) -> Result<Vec<String>> {
    match command {
        Commands::Validate { path } => validate_target(Utf8Path::new(&path)).await,
        Commands::Queue(QueueArgs { file, force }) => {
            let mut pipeline = open(settings).await?;
            queue(&mut pipeline, Utf8Path::new(&file), force).await
        }
        Commands::SendOne { file } => {
            let mut pipeline = open(settings).await?;
            send_one(&mut pipeline, &deliverer(settings)?, Utf8Path::new(&file)).await
        }
        Commands::Worker(WorkerArgs { no_archive }) => {
            let mut pipeline = open(settings).await?;
            worker(&mut pipeline, &deliverer(settings)?, !no_archive).await
        }
        Commands::List => {
            let pipeline = open(settings).await?;
            let listings = pipeline.list_state().await?;
            Ok(render_listing(&listings))
        }
    }
}

async fn open(settings: &RuntimeSettings) -> Result<Pipeline> {
    let layout = settings.layout().clone();
    let root = layout.root().to_owned();
    Pipeline::open(layout)
        .await
        .with_context(|| format!("failed to open pipeline at {root}"))
}

fn deliverer(settings: &RuntimeSettings) -> Result<Deliverer<MllpClient>> {
    let client = MllpClient::new(settings.transport().clone())
        .context("failed to prepare the MLLP client")?;
    Ok(Deliverer::new(client, settings.retry()))
}

/// Validate a file, or every document directly inside a directory.
async fn validate_target(target: &Utf8Path) -> Result<Vec<String>> {
    let is_dir = tokio::fs::metadata(target)
        .await
        .is_ok_and(|meta| meta.is_dir());
    let files: Vec<Utf8PathBuf> = if is_dir {
        list_documents(target)
            .await?
            .into_iter()
            .map(|name| target.join(name))
            .collect()
    } else {
        vec![target.to_owned()]
    };
    let mut lines = Vec::with_capacity(files.len());
    for file in files {
        let payload = match tokio::fs::read(&file).await {
            Ok(payload) => payload,
            Err(e) => {
                lines.push(format!("Missing: {file} ({e})"));
                continue;
            }
        };
        lines.push(match validate(&payload) {
            Ok(note) => format!("{file}: OK ({note})"),
            Err(invalid) => format!("{file}: INVALID ({invalid})"),
        });
    }
    Ok(lines)
}

async fn queue(pipeline: &mut Pipeline, source: &Utf8Path, force: bool) -> Result<Vec<String>> {
    if !is_file(source).await {
        bail!("source file not found: {source}");
    }
    match pipeline.promote_to_ready(source, force).await {
        Ok(dest) => Ok(vec![format!("Queued: {dest}")]),
        Err(e @ PipelineError::Conflict { .. }) => Err(e).context("destination exists"),
        Err(e) => Err(e).with_context(|| format!("failed to queue {source}")),
    }
}

async fn send_one(
    pipeline: &mut Pipeline,
    deliverer: &Deliverer<MllpClient>,
    file: &Utf8Path,
) -> Result<Vec<String>> {
    if !is_file(file).await {
        bail!("file not found: {file}");
    }
    info!(%file, receiver = %deliverer.transport().config().addr(), "sending single document");
    let outcome = match pipeline.send_single(file, deliverer).await {
        Ok(outcome) => outcome,
        Err(e @ PipelineError::Conflict { .. }) => {
            return Err(e).context("document is queued in ready; run the worker instead");
        }
        Err(e) => return Err(e).with_context(|| format!("failed to settle {file}")),
    };
    Ok(vec![match outcome {
        SendOutcome::Rejected(note) => format!("Validation failed: {note}"),
        SendOutcome::Sent { path, record } => {
            format!("Sent and moved to {path} after {} attempt(s)", record.attempts)
        }
        SendOutcome::Failed { path, record } => format!(
            "Send failed; moved to {path} ({})",
            record.error.as_deref().unwrap_or("no acknowledgement")
        ),
    }])
}

async fn is_file(path: &Utf8Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

async fn worker(
    pipeline: &mut Pipeline,
    deliverer: &Deliverer<MllpClient>,
    archive: bool,
) -> Result<Vec<String>> {
    let ready = pipeline.layout().dir(PipelineState::Ready);
    let mut lines = vec![format!("Processing ready queue: {ready}")];
    let report = pipeline.run_queue(deliverer, archive).await?;
    lines.extend(report.sent.iter().map(|name| format!("sent: {name}")));
    lines.extend(report.failed.iter().map(|name| format!("failed: {name}")));
    lines.extend(
        report
            .errored
            .iter()
            .map(|(name, reason)| format!("error: {name}: {reason}")),
    );
    lines.push(format!(
        "Done. {} sent, {} failed, {} errored.",
        report.sent.len(),
        report.failed.len(),
        report.errored.len()
    ));
    Ok(lines)
}

/// Render state listings the way `list` prints them.
#[must_use]
pub fn render_listing(listings: &[StateListing]) -> Vec<String> {
    let mut lines = Vec::new();
    for listing in listings {
        lines.push("=".repeat(RULE_WIDTH));
        lines.push(format!(
            "{} ({}):",
            listing.state.dir_name().to_uppercase(),
            listing.dir
        ));
        if listing.documents.is_empty() {
            lines.push("  (empty)".to_owned());
            continue;
        }
        for doc in &listing.documents {
            lines.push(format!(" - {}", doc.name));
            match &doc.sidecar {
                SidecarStatus::Absent => {}
                SidecarStatus::Parsed(meta) => match serde_json::to_string(meta) {
                    Ok(json) => lines.push(format!("    meta: {json}")),
                    Err(e) => lines.push(format!("    meta: failed_to_render: {e}")),
                },
                SidecarStatus::Unreadable(reason) => lines.push(format!("    meta: {reason}")),
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    const VALID: &str = "UNB+UNOA:1+S+R+240101:1200+1'\nUNH+1+ORDERS:D:96A:UN'\nBGM+220+1+9'\nUNT+3+1'\nUNZ+1+1'\n";

    struct Workspace {
        _tmp: TempDir,
        root: Utf8PathBuf,
        settings: RuntimeSettings,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let tmp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
        let config = AppConfig {
            root: root.to_string(),
            host: "127.0.0.1".to_owned(),
            port: 2575,
            timeout_secs: 1,
            attempts: 1,
            backoff_ms: 0,
            tls: false,
            ca_file: None,
        };
        let settings = RuntimeSettings::from_config(&config).expect("settings");
        Workspace {
            _tmp: tmp,
            root,
            settings,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn validate_reports_each_document_in_directory(workspace: Workspace) {
        let dir = workspace.root.join("inbox");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("a.edi"), VALID).expect("write");
        std::fs::write(dir.join("b.edi"), "hello").expect("write");

        let lines = execute(
            &workspace.settings,
            Commands::Validate {
                path: dir.to_string(),
            },
        )
        .await
        .expect("validate");

        assert_eq!(
            lines,
            vec![
                format!("{}: OK (ok)", dir.join("a.edi")),
                format!("{}: INVALID (missing_UNA_or_UNB)", dir.join("b.edi")),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn validate_reports_missing_file(workspace: Workspace) {
        let missing = workspace.root.join("nope.edi");
        let lines = validate_target(&missing).await.expect("validate");
        assert_eq!(lines.len(), 1);
        assert!(lines.first().is_some_and(|l| l.starts_with("Missing: ")));
    }

    #[rstest]
    #[tokio::test]
    async fn queue_then_conflict(workspace: Workspace) {
        let source = workspace.root.join("order.edi");
        std::fs::write(&source, VALID).expect("write");
        let command = || {
            Commands::Queue(QueueArgs {
                file: source.to_string(),
                force: false,
            })
        };

        let lines = execute(&workspace.settings, command()).await.expect("queue");
        assert_eq!(
            lines,
            vec![format!("Queued: {}", workspace.root.join("ready/order.edi"))]
        );

        let err = execute(&workspace.settings, command())
            .await
            .expect_err("second queue conflicts");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Conflict { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn queue_rejects_missing_source(workspace: Workspace) {
        let err = execute(
            &workspace.settings,
            Commands::Queue(QueueArgs {
                file: workspace.root.join("ghost.edi").to_string(),
                force: true,
            }),
        )
        .await
        .expect_err("missing source");
        assert!(err.to_string().contains("source file not found"));
    }

    #[rstest]
    #[tokio::test]
    async fn send_one_refuses_name_queued_in_ready(workspace: Workspace) {
        let source = workspace.root.join("order.edi");
        std::fs::write(&source, VALID).expect("write");
        execute(
            &workspace.settings,
            Commands::Queue(QueueArgs {
                file: source.to_string(),
                force: false,
            }),
        )
        .await
        .expect("queue");

        let err = execute(
            &workspace.settings,
            Commands::SendOne {
                file: source.to_string(),
            },
        )
        .await
        .expect_err("name is queued");

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Conflict { state: PipelineState::Ready, .. })
        ));
        assert!(workspace.root.join("ready/order.edi").exists());
        assert!(source.exists());
    }

    #[rstest]
    #[tokio::test]
    async fn send_one_rejects_missing_file(workspace: Workspace) {
        let err = execute(
            &workspace.settings,
            Commands::SendOne {
                file: workspace.root.join("ghost.edi").to_string(),
            },
        )
        .await
        .expect_err("missing file");
        assert!(err.to_string().contains("file not found"));
    }

    #[rstest]
    #[tokio::test]
    async fn list_shows_empty_states(workspace: Workspace) {
        let lines = execute(&workspace.settings, Commands::List)
            .await
            .expect("list");
        assert_eq!(lines.len(), PipelineState::ALL.len() * 3);
        assert!(lines.contains(&format!("READY ({}):", workspace.root.join("ready"))));
        assert!(lines.contains(&format!("ARCHIVE ({}):", workspace.root.join("archive"))));
        assert_eq!(lines.iter().filter(|l| *l == "  (empty)").count(), 5);
    }

    #[rstest]
    #[tokio::test]
    async fn worker_on_empty_queue_reports_nothing(workspace: Workspace) {
        let lines = execute(&workspace.settings, Commands::Worker(WorkerArgs::default()))
            .await
            .expect("worker");
        assert_eq!(
            lines,
            vec![
                format!("Processing ready queue: {}", workspace.root.join("ready")),
                "Done. 0 sent, 0 failed, 0 errored.".to_owned(),
            ]
        );
    }
}
