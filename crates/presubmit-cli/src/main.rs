//! Presubmit - open-change poller and presubmit-test dispatcher
//!
//! ## Commands
//!
//! - `query`: run one polling round against Gerrit and Jenkins, then submit
//!   approved changes marked `AutoSubmit`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use presubmit_clients::{GerritClient, JenkinsClient};
use presubmit_core::{run_query, PresubmitConfig};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "presubmit")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger presubmit builds for new Gerrit patchsets", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "PRESUBMIT_CONFIG", default_value = "presubmit.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query open changes and dispatch presubmit builds for new patchsets
    Query(QueryArgs),
}

#[derive(Args, Debug, Default)]
struct QueryArgs {
    /// Gerrit query selecting the changes to consider
    #[arg(long, env = "PRESUBMIT_QUERY")]
    query: Option<String>,

    /// File holding the refs seen by the previous round
    #[arg(long, env = "PRESUBMIT_LOG_FILE")]
    log_file: Option<String>,

    /// Jenkins host; an empty value records changes without dispatching
    #[arg(long, env = "JENKINS_HOST")]
    jenkins_host: Option<String>,

    /// Jenkins job that runs presubmit tests
    #[arg(long, env = "JENKINS_JOB")]
    jenkins_job: Option<String>,

    #[arg(long, env = "GERRIT_USER")]
    gerrit_user: Option<String>,

    #[arg(long, env = "GERRIT_PASSWORD", hide_env_values = true)]
    gerrit_password: Option<String>,

    #[arg(long, env = "JENKINS_USER")]
    jenkins_user: Option<String>,

    #[arg(long, env = "JENKINS_TOKEN", hide_env_values = true)]
    jenkins_token: Option<String>,

    /// Print the full run report as JSON
    #[arg(long)]
    report: bool,
}

impl QueryArgs {
    /// Layer command-line and environment values over the file config.
    fn apply(&self, config: &mut PresubmitConfig) {
        let overrides = [
            (&self.query, &mut config.gerrit.query),
            (&self.log_file, &mut config.presubmit.log_file),
            (&self.jenkins_host, &mut config.jenkins.host),
            (&self.jenkins_job, &mut config.jenkins.job),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        if self.gerrit_user.is_some() {
            config.gerrit.user = self.gerrit_user.clone();
        }
        if self.gerrit_password.is_some() {
            config.gerrit.password = self.gerrit_password.clone();
        }
        if self.jenkins_user.is_some() {
            config.jenkins.user = self.jenkins_user.clone();
        }
        if self.jenkins_token.is_some() {
            config.jenkins.token = self.jenkins_token.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    presubmit_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Query(args) => cmd_query(&cli.config, &args).await,
    }
}

async fn cmd_query(config_path: &Path, args: &QueryArgs) -> Result<()> {
    let mut config = PresubmitConfig::from_file(config_path)
        .with_context(|| format!("Failed to load config file: {:?}", config_path))?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let timeout = Duration::from_secs(config.presubmit.request_timeout_secs);
    let gerrit =
        GerritClient::new(&config.gerrit, timeout).context("Failed to create Gerrit client")?;
    let jenkins =
        JenkinsClient::new(&config.jenkins, timeout).context("Failed to create Jenkins client")?;

    info!(query = %config.gerrit.query, "starting presubmit round");
    let report = run_query(&config, &gerrit, &jenkins)
        .await
        .context("Presubmit round failed")?;

    if args.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    println!("{} sent.", report.sent);
    if report.submitted > 0 {
        println!("{} submitted.", report.submitted);
    }
    Ok(())
}
