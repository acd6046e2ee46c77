use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, info};
use tokio::sync::broadcast::error::RecvError;

use vaultshift::config::Config;
use vaultshift::date_normalizer::DateNormalizer;
use vaultshift::error::VaultShiftError;
use vaultshift::events::{UpgradeEvents, UpgradeMessage};
use vaultshift::migrations::{builtin_upgrades, running_version};
use vaultshift::prompt::{ConfirmationPrompt, ConsolePrompt, FixedPrompt};
use vaultshift::state::PersistedState;
use vaultshift::store::{
    DryRunFileStore, DryRunStateStore, FileStore, JsonStateStore, StateStore, VaultFileStore,
};
use vaultshift::upgrade::{IncrementalUpgradeManager, UpgradeChainResolver, UpgradeHost};
use vaultshift::version::Version;

#[derive(Parser)]
#[command(
    name = "vaultshift",
    version,
    about = "vaultshift: upgrades a chat-archive vault to the running release"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every pending upgrade against a vault
    Upgrade {
        /// Vault root directory
        #[arg(long)]
        vault: PathBuf,

        /// Upgrade to this version instead of the running one
        #[arg(long)]
        to: Option<String>,

        /// Run optional steps without asking
        #[arg(long, conflicts_with = "no_manual")]
        yes: bool,

        /// Postpone optional steps without asking
        #[arg(long = "no-manual")]
        no_manual: bool,

        /// Report what would change without writing anything
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Show the upgrade state of a vault
    Status {
        #[arg(long)]
        vault: PathBuf,
    },

    /// Clear completion records so operations run again
    Reset {
        #[arg(long)]
        vault: PathBuf,

        /// Release whose records to clear
        #[arg(long)]
        version: String,

        /// Clear only this operation of the release
        #[arg(long)]
        operation: Option<String>,
    },

    /// Show how a date string is read
    #[command(name = "parse-date")]
    ParseDate { text: String },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), VaultShiftError> {
        let args = Cli::parse();

        let project_dirs = ProjectDirs::from("", "", "vaultshift");
        let config = Config::load_config(project_dirs.as_ref(), args.config.as_deref());
        let _logger = Self::setup_logging(&config, project_dirs.as_ref())?;
        debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

        match args.command {
            Command::Upgrade {
                vault,
                to,
                yes,
                no_manual,
                dry_run,
            } => {
                let prompt: Arc<dyn ConfirmationPrompt> = if yes {
                    Arc::new(FixedPrompt::accept())
                } else if no_manual {
                    Arc::new(FixedPrompt::decline())
                } else {
                    Arc::new(ConsolePrompt)
                };
                let target = match to {
                    Some(to) => Version::parse(&to)?,
                    None => running_version(),
                };
                Self::block_on(Self::upgrade(config, vault, target, prompt, dry_run))
            }
            Command::Status { vault } => Self::block_on(Self::status(config, vault)),
            Command::Reset {
                vault,
                version,
                operation,
            } => {
                let version = Version::parse(&version)?;
                Self::block_on(Self::reset(config, vault, version, operation))
            }
            Command::ParseDate { text } => {
                let dates = DateNormalizer::new(config.dates.ambiguous_order());
                match dates.to_iso(&text) {
                    Some(iso) => println!("{}", iso),
                    None => println!("unknown"),
                }
                Ok(())
            }
        }
    }

    fn setup_logging(
        config: &Config,
        project_dirs: Option<&ProjectDirs>,
    ) -> Result<LoggerHandle, VaultShiftError> {
        let spec = format!("warn, vaultshift={}", config.logging.vaultshift);
        let logger = Logger::try_with_str(&spec)
            .map_err(|e| VaultShiftError::ConfigError(format!("Invalid log spec: {}", e)))?;

        let logger = match project_dirs {
            Some(dirs) => logger
                .log_to_file(
                    FileSpec::default()
                        .directory(dirs.data_local_dir().join("logs"))
                        .basename("vaultshift"),
                )
                .rotate(
                    Criterion::Size(10_000_000),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(7),
                )
                .duplicate_to_stderr(Duplicate::Warn),
            None => logger,
        };

        logger
            .start()
            .map_err(|e| VaultShiftError::Error(format!("Failed to start logging: {}", e)))
    }

    fn block_on<F>(future: F) -> Result<(), VaultShiftError>
    where
        F: std::future::Future<Output = Result<(), VaultShiftError>>,
    {
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| VaultShiftError::Error(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(future)
    }

    fn state_store(config: &Config, vault: &Path) -> JsonStateStore {
        JsonStateStore::new(config.vault.state_path(vault))
    }

    async fn upgrade(
        config: Config,
        vault: PathBuf,
        target: Version,
        prompt: Arc<dyn ConfirmationPrompt>,
        dry_run: bool,
    ) -> Result<(), VaultShiftError> {
        if !vault.is_dir() {
            return Err(VaultShiftError::Error(format!(
                "Vault directory not found: {}",
                vault.display()
            )));
        }

        let real_files: Arc<dyn FileStore> = Arc::new(VaultFileStore::new(vault.clone()));
        let real_state: Arc<dyn StateStore> = Arc::new(Self::state_store(&config, &vault));
        let dry_files = dry_run.then(|| Arc::new(DryRunFileStore::new(real_files.clone())));

        let files: Arc<dyn FileStore> = match &dry_files {
            Some(dry) => dry.clone() as Arc<dyn FileStore>,
            None => real_files,
        };
        let state_store: Arc<dyn StateStore> = if dry_run {
            Arc::new(DryRunStateStore::new(real_state))
        } else {
            real_state
        };

        let events = Arc::new(UpgradeEvents::new());
        let (_, mut rx) = events.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(UpgradeMessage::Progress { percent, detail }) => {
                        println!("[{:>3}%] {}", percent, detail)
                    }
                    Ok(UpgradeMessage::Notice { message }) => println!("{}", message),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let host = UpgradeHost {
            files,
            state_store,
            prompt,
            progress: events.clone(),
            notifier: events.clone(),
        };
        let manager = IncrementalUpgradeManager::new(
            UpgradeChainResolver::new(builtin_upgrades())?,
            host,
            config,
            target,
        );

        let outcome = manager.check_and_perform_upgrade().await;

        // Closing the channel ends the printer once it has drained
        drop(manager);
        drop(events);
        let _ = printer.await;

        if let Some(dry) = &dry_files {
            println!(
                "(dry run: {} write(s) and {} rename(s) skipped, state not saved)",
                dry.skipped_writes(),
                dry.skipped_renames()
            );
        }

        match outcome? {
            None => {
                println!("Vault is already up to date ({})", target);
                Ok(())
            }
            Some(result) => {
                for (op, failure) in result.failures() {
                    println!("  FAILED {} {}: {}", op.version, op.name, failure.message());
                }
                if result.success() {
                    Ok(())
                } else {
                    Err(VaultShiftError::Error(format!(
                        "Upgrade to {} is incomplete",
                        target
                    )))
                }
            }
        }
    }

    async fn status(config: Config, vault: PathBuf) -> Result<(), VaultShiftError> {
        let state = Self::state_store(&config, &vault).load().await?;
        let resolver = UpgradeChainResolver::new(builtin_upgrades())?;
        let running = running_version();
        let last = state.last_version();

        println!("Running version:  {}", running);
        println!(
            "Last upgraded to: {}",
            state.recorded_version().unwrap_or("(never)")
        );
        let completed: Vec<String> = state
            .completed_versions()
            .iter()
            .map(Version::to_string)
            .collect();
        println!(
            "Completed:        {}",
            if completed.is_empty() {
                "(none)".to_owned()
            } else {
                completed.join(", ")
            }
        );

        if state.is_version_complete(&running) {
            println!("Up to date.");
            return Ok(());
        }

        let chain = resolver.resolve(&last, &running);
        if chain.is_empty() {
            println!("No pending upgrades.");
        }
        for upgrade in chain {
            println!("Pending {}:", upgrade.version);
            for (kind, op) in upgrade.operations() {
                let mark = if state.is_operation_complete(&upgrade.version, op.id()) {
                    "x"
                } else {
                    " "
                };
                println!("  [{}] {} ({}): {}", mark, op.id(), kind, op.description());
            }
        }
        Ok(())
    }

    async fn reset(
        config: Config,
        vault: PathBuf,
        version: Version,
        operation: Option<String>,
    ) -> Result<(), VaultShiftError> {
        let store = Self::state_store(&config, &vault);
        let mut state: PersistedState = store.load().await?;

        let removed = match operation.as_deref() {
            Some(id) => usize::from(state.reset_operation(&version, id)),
            None => state.reset_version(&version),
        };

        if removed == 0 {
            println!("Nothing to reset for {}", version);
            return Ok(());
        }

        store.save(&state).await?;
        info!("Reset {} completion record(s) for {}", removed, version);
        println!("Reset {} completion record(s) for {}", removed, version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing_upgrade() {
        let cli = Cli::try_parse_from(["vaultshift", "upgrade", "--vault", "/tmp/v", "--yes"]).unwrap();
        match cli.command {
            Command::Upgrade {
                vault,
                to,
                yes,
                no_manual,
                dry_run,
            } => {
                assert_eq!(vault, PathBuf::from("/tmp/v"));
                assert!(to.is_none());
                assert!(yes);
                assert!(!no_manual);
                assert!(!dry_run);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_cli_parsing_global_config_and_reset() {
        let cli = Cli::try_parse_from([
            "vaultshift",
            "reset",
            "--vault",
            "v",
            "--version",
            "1.1.0",
            "--operation",
            "remove-conversation-catalog",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            cli.command,
            Command::Reset { operation: Some(ref op), .. } if op == "remove-conversation-catalog"
        ));
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["vaultshift", "upgrade", "--vault", "v", "--yes", "--no-manual"]);
        assert!(result.is_err(), "--yes and --no-manual conflict");

        let result = Cli::try_parse_from(["vaultshift", "upgrade"]);
        assert!(result.is_err(), "--vault is required");

        let result = Cli::try_parse_from(["vaultshift", "nonexistent-command"]);
        assert!(result.is_err(), "Should reject unknown commands");
    }

    #[test]
    fn test_cli_parsing_parse_date() {
        let cli = Cli::try_parse_from(["vaultshift", "parse-date", "28.06.2024 22:34:21"]).unwrap();
        assert!(matches!(cli.command, Command::ParseDate { ref text } if text == "28.06.2024 22:34:21"));
    }
}
