use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use checkgate_core::{
    fingerprint, ApplicationKey, ApplicationStore, CommitChecker, GitHubClient, SqliteStore,
    DEFAULT_API_URL,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// checkgate: inspect CI-gated generator state
#[derive(Parser, Debug)]
#[command(name = "checkgate")]
#[command(about = "Evaluate commit checks and inspect stored known-good state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a commit passed the required check runs
    Check(CheckArgs),
    /// Inspect stored application records
    #[command(subcommand)]
    Records(RecordsCommand),
    /// Print the fingerprint stored for a commit and set of checks
    Fingerprint(FingerprintArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Repository as org/name
    #[arg(long)]
    repo: String,

    /// Commit SHA to evaluate
    #[arg(long)]
    sha: String,

    /// Check name pattern; may be repeated, evaluated in order
    #[arg(long = "check", required = true)]
    checks: Vec<String>,

    /// GitHub token (if not provided, will use GITHUB_TOKEN environment variable)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Subcommand, Debug)]
enum RecordsCommand {
    /// Print every record as one JSON object per line
    List(DbArgs),
    /// Print the record for one application
    Show(ShowArgs),
}

#[derive(Parser, Debug)]
struct DbArgs {
    /// Path to the SQLite database
    #[arg(long, env = "DB_FILE", default_value = "checkgate.db")]
    db: PathBuf,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    #[command(flatten)]
    db: DbArgs,

    #[arg(long)]
    app_set: String,

    #[arg(long)]
    repo: String,

    #[arg(long)]
    branch: String,
}

#[derive(Parser, Debug)]
struct FingerprintArgs {
    #[arg(long)]
    sha: String,

    #[arg(long = "check", required = true)]
    checks: Vec<String>,
}

async fn run_check(args: CheckArgs) -> Result<ExitCode> {
    let client = GitHubClient::new(args.token, &args.api_url, false)?;
    let passed = client
        .commit_passed_checks(&args.checks, &args.repo, &args.sha)
        .await
        .with_context(|| format!("Failed to evaluate checks for {}@{}", args.repo, args.sha))?;

    if passed {
        println!("{}@{}: passed", args.repo, args.sha);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}@{}: failed", args.repo, args.sha);
        Ok(ExitCode::FAILURE)
    }
}

fn open_store(args: &DbArgs) -> Result<SqliteStore> {
    if !args.db.exists() {
        return Err(anyhow!("Database {} does not exist", args.db.display()));
    }
    SqliteStore::open(&args.db).with_context(|| format!("Failed to open {}", args.db.display()))
}

async fn run_records(command: RecordsCommand) -> Result<ExitCode> {
    match command {
        RecordsCommand::List(args) => {
            let store = open_store(&args)?;
            for record in store.list().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
            store.close().await?;
        }
        RecordsCommand::Show(args) => {
            let store = open_store(&args.db)?;
            let key = ApplicationKey::new(args.app_set, args.repo, args.branch);
            let record = store.get(&key).await?;
            store.close().await?;
            let record = record.ok_or_else(|| anyhow!("No record for {}", key))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check(args) => run_check(args).await,
        Commands::Records(command) => run_records(command).await,
        Commands::Fingerprint(args) => {
            println!("{}", fingerprint(&args.sha, &args.checks));
            Ok(ExitCode::SUCCESS)
        }
    }
}
