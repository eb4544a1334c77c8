//! `rfdtool` command line entry point.
//!
//! # Responsibility
//! - Bulk-import RFD folders and remote RFD branches, push single RFDs.
//! - Run the authoring pipeline and the reconciliation scan locally.
//!
//! # Invariants
//! - Submissions go to `RFD_SERVER` when it and `RFD_TOKEN` are set, to the
//!   configured local store otherwise.
//! - Queued discussion write-backs are drained before the process exits.

mod import;
mod submit;

use clap::{Parser, Subcommand};
use import::{import_branches, import_folder, read_rfd, rfd_id_from_dir_name, ImportSummary};
use log::{error, info};
use rfdtool_core::authoring::git::GitError;
use rfdtool_core::writeback::JobStatus;
use rfdtool_core::{
    default_log_level, init_logging, Config, ConfigError, MarkdownRenderer, RenderError, RfdId,
    RfdService, RfdValidationError, ServiceError, TemplateOverlay,
};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitCode;
use submit::{LocalSubmitter, RemoteSubmitter, Submitted, Submitter};

#[derive(Parser, Debug)]
#[command(name = "rfdtool", version, about = "Import, push and author RFDs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML configuration file
    #[arg(long, global = true, env = "RFDTOOL_CONFIG", default_value = "rfdtool.yaml")]
    config: PathBuf,

    /// trace|debug|info|warn|error (default depends on build mode)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log directory (default `<data_path>/logs`, stderr in remote mode)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Remote server base URL
    #[arg(long, global = true, env = "RFD_SERVER")]
    server: Option<String>,

    /// API token for the remote server
    #[arg(long, global = true, env = "RFD_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every `NNNN/README.md` below a folder
    ImportFolder {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Import RFDs from `origin/NNNN` branches of a local clone
    ImportBranches {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long, default_value = "rfd")]
        rfd_folder: String,
    },
    /// Push a single RFD
    Push {
        /// RFD number, four digits
        #[arg(long)]
        rfd: String,
        #[arg(long)]
        folder: PathBuf,
    },
    /// Author a new RFD through the source repository
    Create {
        #[arg(long)]
        title: String,
        /// Comma-separated `Name <email>` entries
        #[arg(long)]
        authors: String,
        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Repair the allocator and rebuild the tag index
    Reconcile,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::ImportFolder { .. } => "import-folder",
            Self::ImportBranches { .. } => "import-branches",
            Self::Push { .. } => "push",
            Self::Create { .. } => "create",
            Self::Reconcile => "reconcile",
        }
    }

    fn submits(&self) -> bool {
        matches!(
            self,
            Self::ImportFolder { .. } | Self::ImportBranches { .. } | Self::Push { .. }
        )
    }
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Service(ServiceError),
    Render(RenderError),
    Validation(RfdValidationError),
    Git(GitError),
    Http(reqwest::Error),
    Json(serde_json::Error),
    Server { status: u16, body: String },
    Read { path: PathBuf, source: std::io::Error },
    DiscussionRequired(RfdId),
    /// The command needs the local store, which remote mode does not open.
    NoLocalStore,
    Logging(String),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Render(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Git(err) => write!(f, "{err}"),
            Self::Http(err) => write!(f, "request failed: {err}"),
            Self::Json(err) => write!(f, "unexpected server payload: {err}"),
            Self::Server { status, body } => write!(f, "server returned {status}: {body}"),
            Self::Read { path, source } => write!(f, "cannot read `{}`: {source}", path.display()),
            Self::DiscussionRequired(id) => write!(f, "rfd {id}: discussion link required"),
            Self::NoLocalStore => write!(f, "no local store is configured for this command"),
            Self::Logging(message) => write!(f, "{message}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Service(err) => Some(err),
            Self::Render(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Git(err) => Some(err),
            Self::Http(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ServiceError> for CliError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<RenderError> for CliError {
    fn from(value: RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<RfdValidationError> for CliError {
    fn from(value: RfdValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<GitError> for CliError {
    fn from(value: GitError) -> Self {
        Self::Git(value)
    }
}

impl From<git2::Error> for CliError {
    fn from(value: git2::Error) -> Self {
        Self::Git(GitError::from(value))
    }
}

impl From<reqwest::Error> for CliError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("event=cli_exit module=cli status=error error={}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn remote_target(cli: &Cli) -> Option<(&str, &str)> {
    let server = cli.server.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    let token = cli.token.as_deref().filter(|t| !t.is_empty())?;
    Some((server, token))
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let remote = if cli.command.submits() {
        remote_target(&cli)
    } else {
        None
    };
    let config = match remote {
        Some(_) => None,
        None => Some(Config::load(&cli.config)?),
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| config.as_ref().map(Config::log_dir));
    init_logging(&level, log_dir.as_deref()).map_err(CliError::Logging)?;
    info!(
        "event=cli_start module=cli status=ok command={} mode={}",
        cli.command.name(),
        if remote.is_some() { "remote" } else { "local" }
    );

    let service = config.as_ref().map(RfdService::from_config).transpose()?;
    let result = dispatch(&cli, remote, service.as_ref());
    if let Some(service) = &service {
        service.shutdown();
        report_writebacks(service);
    }
    result
}

fn dispatch(
    cli: &Cli,
    remote: Option<(&str, &str)>,
    service: Option<&RfdService>,
) -> Result<ExitCode, CliError> {
    let renderer = MarkdownRenderer;
    let remote_submitter;
    let local_submitter;
    let submitter: &dyn Submitter = match (remote, service) {
        (Some((server, token)), _) => {
            remote_submitter = RemoteSubmitter::new(server, token)?;
            &remote_submitter
        }
        (None, Some(service)) => {
            local_submitter = LocalSubmitter::new(service);
            &local_submitter
        }
        (None, None) => return Err(CliError::NoLocalStore),
    };

    match &cli.command {
        Command::ImportFolder { folder } => {
            let summary = import_folder(&renderer, submitter, folder)?;
            Ok(print_summary(&summary))
        }
        Command::ImportBranches { repo, rfd_folder } => {
            let summary = import_branches(&renderer, submitter, repo, rfd_folder)?;
            Ok(print_summary(&summary))
        }
        Command::Push { rfd, folder } => {
            let id = rfd_id_from_dir_name(rfd)
                .ok_or_else(|| RfdValidationError::InvalidId(rfd.clone()))?;
            let document = read_rfd(&renderer, folder, rfd, id, false)?;
            let submitted = submitter.submit(&document)?;
            let verb = match submitted {
                Submitted::Created => "created",
                Submitted::Updated => "updated",
                Submitted::Accepted => "submitted",
            };
            println!("rfd {id} {verb}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Create {
            title,
            authors,
            tags,
        } => {
            let service = local_service(service)?;
            let overlay = TemplateOverlay {
                title: title.clone(),
                authors: authors.clone(),
                tags: tags.clone(),
            };
            let outcome = service.create_rfd(&overlay)?;
            println!("created rfd {}", outcome.rfd.id);
            if !outcome.rfd.discussion.is_empty() {
                println!("discussion {}", outcome.rfd.discussion);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Reconcile => {
            let report = local_service(service)?.reconcile()?;
            println!(
                "next rfd {}; tags created {}, updated {}; references added {}, removed {}",
                report.next_rfd,
                report.tags.tags_created,
                report.tags.tags_updated,
                report.tags.references_added,
                report.tags.references_removed
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn local_service(service: Option<&RfdService>) -> Result<&RfdService, CliError> {
    service.ok_or(CliError::NoLocalStore)
}

fn print_summary(summary: &ImportSummary) -> ExitCode {
    println!(
        "import complete: {} created, {} updated, {} submitted, {} failed",
        summary.created, summary.updated, summary.accepted, summary.failed
    );
    if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn report_writebacks(service: &RfdService) {
    let Some(queue) = service.writeback() else {
        return;
    };
    for job in queue.jobs() {
        match job.status {
            JobStatus::Succeeded => println!("discussion link written back for rfd {}", job.rfd_id),
            JobStatus::Failed { attempts, error } => eprintln!(
                "discussion write-back for rfd {} failed after {attempts} attempt(s): {error}",
                job.rfd_id
            ),
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}
