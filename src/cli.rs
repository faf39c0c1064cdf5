use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::accounts::{CredentialTable, MailboxPair};
use crate::config::MigratorConfig;
use crate::imap::TcpConnector;
use crate::logging;
use crate::migration::{report, MigrationEngine, MigrationReport, Mode};

/// imap-migrator - back up, restore and migrate IMAP mailboxes
#[derive(Parser, Debug)]
#[command(name = "imap-migrator")]
#[command(about = "Back up, restore and migrate IMAP mailboxes listed in a CSV file")]
#[command(version)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .multiple(true)
        .args(["list_old", "list_new", "backup", "restore", "migrate"])
))]
pub struct Cli {
    /// Mailboxes to process, by source username, or "all"
    #[arg(required = true)]
    pub labels: Vec<String>,

    /// List folders on the source servers
    #[arg(short = 'l', long = "list-old")]
    pub list_old: bool,

    /// List folders on the destination servers
    #[arg(long = "list-new")]
    pub list_new: bool,

    /// Back up source mailboxes into the output directory
    #[arg(short, long)]
    pub backup: bool,

    /// Restore backups from the output directory onto the destination servers
    #[arg(short, long)]
    pub restore: bool,

    /// Copy straight from source to destination without an archive
    #[arg(long)]
    pub migrate: bool,

    /// Credentials file
    #[arg(short, long, default_value = "mailboxes.csv")]
    pub csv: PathBuf,

    /// Archive root directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Mailbox pairs to process concurrently
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per network operation
    #[arg(long)]
    pub retries: Option<usize>,

    /// Write the final report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// More output; repeat up to four times
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Requested modes in execution order
    pub fn modes(&self) -> Vec<Mode> {
        [
            (self.list_old, Mode::ListSource),
            (self.list_new, Mode::ListDestination),
            (self.backup, Mode::Backup),
            (self.restore, Mode::Restore),
            (self.migrate, Mode::Migrate),
        ]
        .into_iter()
        .filter_map(|(on, mode)| on.then_some(mode))
        .collect()
    }

    pub fn apply_overrides(&self, config: &mut MigratorConfig) {
        if let Some(output) = &self.output {
            config.run.output = output.clone();
        }
        if let Some(jobs) = self.jobs {
            config.run.jobs = jobs;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
    }
}

/// Command-line interface handler
pub struct CliHandler {
    cli: Cli,
    engine: MigrationEngine,
    pairs: Vec<MailboxPair>,
}

impl CliHandler {
    /// Load configuration and credentials and set up logging
    pub fn new(cli: Cli) -> Result<Self> {
        let mut config = MigratorConfig::load(cli.config.as_deref())?;
        cli.apply_overrides(&mut config);
        config.validate()?;

        logging::init(&config.run.log_file, logging::level_for(cli.verbose, cli.debug))
            .with_context(|| format!("Cannot open log file {}", config.run.log_file.display()))?;

        let table = CredentialTable::load(&cli.csv)?;
        let pairs = table.select(&cli.labels)?;
        info!(
            "Selected {} of {} mailbox(es) from {}",
            pairs.len(),
            table.len(),
            cli.csv.display()
        );

        let engine = MigrationEngine::new(config, Arc::new(TcpConnector))?;
        Ok(Self { cli, engine, pairs })
    }

    /// Run every requested mode and return the process exit code
    pub async fn handle(&self) -> Result<i32> {
        let token = self.engine.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current message");
                token.cancel();
            }
        });

        let mut reports: Vec<MigrationReport> = Vec::new();
        for mode in self.cli.modes() {
            let report = self.engine.run(mode, &self.pairs).await;
            print!("{}", report.render_text());
            let stop = report.cancelled;
            reports.push(report);
            if stop {
                break;
            }
        }

        if let Some(path) = &self.cli.report {
            report::write_json(path, &reports)
                .with_context(|| format!("Cannot write report to {}", path.display()))?;
        }

        Ok(reports
            .iter()
            .map(MigrationReport::exit_code)
            .max()
            .unwrap_or(0))
    }
}
