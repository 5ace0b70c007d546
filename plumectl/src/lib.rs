use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use plume_core::{ConfigBundle, Draft, PlumeService, SessionStatus};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] plume_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Core(#[from] plume_core::OpError),
    #[error("login did not complete: {0}")]
    Login(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "plume command-line control interface", long_about = None)]
pub struct Cli {
    /// Directory containing plume.toml and browser.toml
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Establish (or restore) a logged-in session for a platform
    Login(PlatformArgs),
    /// Session record operations
    #[command(subcommand)]
    Session(SessionCommands),
    /// Search content by keyword
    Search(SearchArgs),
    /// Content page operations
    #[command(subcommand)]
    Note(NoteCommands),
    /// Post a comment on a content page
    Comment(CommentArgs),
    /// Publish a draft through the creator studio
    Publish(PublishArgs),
    /// Show recent automation telemetry
    Diagnostics(DiagnosticsArgs),
}

#[derive(Args, Debug)]
pub struct PlatformArgs {
    /// Platform id (a key under [platforms] in browser.toml)
    pub platform: String,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Show whether a stored session is usable and how old it is
    Info(PlatformArgs),
    /// Drop the stored session; the next login is interactive
    Invalidate(PlatformArgs),
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub platform: String,
    pub keywords: String,
    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// Fetch title/author/body of a content page
    Show(NoteArgs),
    /// Expand and list the comments of a content page
    Comments(NoteArgs),
}

#[derive(Args, Debug)]
pub struct NoteArgs {
    pub platform: String,
    pub url: String,
}

#[derive(Args, Debug)]
pub struct CommentArgs {
    pub platform: String,
    pub url: String,
    pub text: String,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    pub platform: String,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub body: String,
    /// Media files (all images, or exactly one video)
    #[arg(required = true)]
    pub media: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DiagnosticsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
struct FailureRow {
    ts: String,
    platform: String,
    stage: String,
    target: String,
    error_message: String,
}

#[derive(Debug, Serialize)]
struct ResolutionRow {
    ts: String,
    platform: String,
    target: String,
    strategy: String,
    strategy_index: i64,
}

pub async fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut bundle = ConfigBundle::from_directory(&cli.config_dir)?;
    if let Some(data_dir) = &cli.data_dir {
        bundle.plume.paths.data_dir = data_dir.to_string_lossy().to_string();
    }

    if let Commands::Diagnostics(args) = &cli.command {
        // Telemetry is read straight from the metrics database; no browser or
        // service is needed for this.
        return show_diagnostics(&bundle, args.limit, cli.format);
    }

    let service = PlumeService::new(bundle)?;
    let outcome = dispatch(&cli, &service).await;
    // The browser must come down cleanly even when the command failed;
    // killing it mid-flight corrupts the persisted profile.
    if let Err(err) = service.shutdown().await {
        eprintln!("warning: browser shutdown failed: {err}");
    }
    outcome
}

async fn dispatch(cli: &Cli, service: &PlumeService) -> Result<()> {
    match &cli.command {
        Commands::Login(args) => {
            let status = service.ensure_login(&args.platform).await?;
            match status {
                SessionStatus::Valid => emit(cli.format, &"session valid", || {
                    format!("{}: session valid", args.platform)
                }),
                SessionStatus::AwaitingUser => Err(AppError::Login(
                    "waiting for the user to complete the interactive flow".into(),
                )),
                SessionStatus::Failed(reason) => Err(AppError::Login(reason)),
            }
        }
        Commands::Session(SessionCommands::Info(args)) => {
            let info = service.get_session_info(&args.platform)?;
            emit(cli.format, &info, || {
                format!(
                    "{}: valid={} age_days={}",
                    args.platform, info.valid, info.age_days
                )
            })
        }
        Commands::Session(SessionCommands::Invalidate(args)) => {
            service.invalidate_session(&args.platform)?;
            emit(cli.format, &"invalidated", || {
                format!("{}: session invalidated", args.platform)
            })
        }
        Commands::Search(args) => {
            let hits = service
                .search(&args.platform, &args.keywords, args.limit)
                .await?;
            emit(cli.format, &json_hits(&hits), || {
                let mut out = format!("{} result(s) for '{}':\n", hits.len(), args.keywords);
                for hit in &hits {
                    out.push_str(&format!("{}. {}\n   {}\n", hit.rank, hit.title, hit.url));
                }
                out
            })
        }
        Commands::Note(NoteCommands::Show(args)) => {
            let note = service.read_note(&args.platform, &args.url).await?;
            emit(cli.format, &serde_json::json!({
                "title": note.title,
                "author": note.author,
                "body": note.body,
            }), || {
                format!("title: {}\nauthor: {}\n\n{}", note.title, note.author, note.body)
            })
        }
        Commands::Note(NoteCommands::Comments(args)) => {
            let comments = service.read_comments(&args.platform, &args.url).await?;
            emit(
                cli.format,
                &serde_json::json!(comments
                    .iter()
                    .map(|c| serde_json::json!({
                        "author": c.author,
                        "body": c.body,
                        "timestamp": c.timestamp,
                    }))
                    .collect::<Vec<_>>()),
                || {
                    let mut out = format!("{} comment(s):\n", comments.len());
                    for comment in &comments {
                        out.push_str(&format!(
                            "- {} ({}): {}\n",
                            comment.author,
                            comment.timestamp.as_deref().unwrap_or("unknown time"),
                            comment.body
                        ));
                    }
                    out
                },
            )
        }
        Commands::Comment(args) => {
            let report = service
                .post_comment(&args.platform, &args.url, &args.text)
                .await?;
            emit(
                cli.format,
                &serde_json::json!({ "method": format!("{:?}", report.method) }),
                || format!("comment posted (via {:?})", report.method),
            )
        }
        Commands::Publish(args) => {
            let draft = Draft {
                title: args.title.clone(),
                body: args.body.clone(),
                media_paths: args.media.clone(),
            };
            service.publish(&args.platform, &draft).await?;
            emit(cli.format, &"published", || "draft published".to_string())
        }
        Commands::Diagnostics(_) => unreachable!("handled before service construction"),
    }
}

fn json_hits(hits: &[plume_core::SearchHit]) -> serde_json::Value {
    serde_json::json!(hits
        .iter()
        .map(|hit| serde_json::json!({
            "rank": hit.rank,
            "title": hit.title,
            "url": hit.url,
        }))
        .collect::<Vec<_>>())
}

fn emit<T: Serialize>(
    format: OutputFormat,
    json_value: &T,
    text: impl FnOnce() -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(json_value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn show_diagnostics(bundle: &ConfigBundle, limit: usize, format: OutputFormat) -> Result<()> {
    let db_path = bundle
        .plume
        .resolve_path(&bundle.plume.observability.metrics_db);
    let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut failures = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT ts, platform, stage, target, error_message
             FROM automation_failures ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(FailureRow {
                ts: row.get(0)?,
                platform: row.get(1)?,
                stage: row.get(2)?,
                target: row.get(3)?,
                error_message: row.get(4)?,
            })
        })?;
        for row in rows {
            failures.push(row?);
        }
    }

    let mut resolutions = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT ts, platform, target, strategy, strategy_index
             FROM resolutions ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(ResolutionRow {
                ts: row.get(0)?,
                platform: row.get(1)?,
                target: row.get(2)?,
                strategy: row.get(3)?,
                strategy_index: row.get(4)?,
            })
        })?;
        for row in rows {
            resolutions.push(row?);
        }
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "failures": failures,
                    "resolutions": resolutions,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("recent failures ({}):", failures.len());
            for failure in &failures {
                println!(
                    "  [{}] {} {} target={} {}",
                    failure.ts, failure.platform, failure.stage, failure.target,
                    failure.error_message
                );
            }
            println!("recent resolutions ({}):", resolutions.len());
            for resolution in &resolutions {
                println!(
                    "  [{}] {} target={} via {} (rung {})",
                    resolution.ts,
                    resolution.platform,
                    resolution.target,
                    resolution.strategy,
                    resolution.strategy_index
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_args_parse() {
        let cli = Cli::parse_from([
            "plumectl", "search", "rednote", "coffee gear", "--limit", "3",
        ]);
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.platform, "rednote");
                assert_eq!(args.keywords, "coffee gear");
                assert_eq!(args.limit, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn comment_args_parse() {
        let cli = Cli::parse_from([
            "plumectl",
            "--format",
            "json",
            "comment",
            "rednote",
            "https://example.com/explore/abc?xsec_token=t",
            "nice!",
        ]);
        match cli.command {
            Commands::Comment(args) => {
                assert_eq!(args.text, "nice!");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
