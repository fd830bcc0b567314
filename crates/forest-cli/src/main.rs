mod config;
mod ingest_cmds;
mod project_cmds;
mod tree_cmds;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use forest_store::{DEFAULT_PATH, DocumentStore, LockManager};

use config::{CliOverrides, ForestConfig};
use ingest_cmds::IngestArgs;

#[derive(Parser)]
#[command(name = "forest", about = "HTA planning store and LLM response ingestion")]
struct Cli {
    /// Data directory (overrides FOREST_DATA_DIR env var)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Lock wait limit in milliseconds, 0 waits forever (overrides FOREST_LOCK_TIMEOUT_MS)
    #[arg(long, global = true)]
    lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a forest config file
    Init {
        /// Provider command line used by `forest generate`
        #[arg(long)]
        provider: Option<String>,
        /// Provider timeout in seconds
        #[arg(long)]
        provider_timeout_secs: Option<u64>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Ingest a provider response from a file or stdin into a path's tree
    Ingest {
        /// Project ID
        project_id: String,
        /// Path name
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
        /// Goal (defaults to the project's goal)
        #[arg(long)]
        goal: Option<String>,
        /// Context (defaults to the project's context)
        #[arg(long)]
        context: Option<String>,
        /// Response file (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Ask the provider for a decomposition and ingest it
    Generate {
        /// Project ID
        project_id: String,
        /// Path name
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
        /// Goal (defaults to the project's goal)
        #[arg(long)]
        goal: Option<String>,
        /// Context (defaults to the project's context)
        #[arg(long)]
        context: Option<String>,
        /// Provider command line (overrides FOREST_PROVIDER_COMMAND env var)
        #[arg(long)]
        provider: Option<String>,
        /// Provider timeout in seconds (overrides FOREST_PROVIDER_TIMEOUT_SECS env var)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// HTA tree inspection
    Tree {
        #[command(subcommand)]
        command: TreeCommands,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a project
    Create {
        /// Project ID (no path separators)
        id: String,
        /// What the project is working towards
        #[arg(long)]
        goal: String,
        /// Free-form background for the goal
        #[arg(long, default_value = "")]
        context: String,
    },
    /// List all projects
    List,
    /// Show one project
    Show {
        /// Project ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum TreeCommands {
    /// Print a path's tree
    Show {
        /// Project ID
        project_id: String,
        /// Path name
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
        /// Print the raw document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report structural repairs and orphaned tasks
    Check {
        /// Project ID
        project_id: String,
        /// Path name
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
        /// Write the repaired tree back, move an unreadable tree aside and
        /// remove leftover temp files
        #[arg(long)]
        fix: bool,
    },
}

/// Execute the `forest init` command: write config file.
fn cmd_init(overrides: &CliOverrides, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let resolved = ForestConfig::resolve(overrides)?;
    let data_dir = std::path::absolute(&resolved.store.data_dir).with_context(|| {
        format!("failed to resolve data dir {}", resolved.store.data_dir.display())
    })?;

    let cfg = config::ConfigFile {
        store: config::StoreSection {
            data_dir: Some(data_dir.clone()),
            lock_timeout_ms: resolved
                .store
                .lock_timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        },
        provider: config::ProviderSection {
            command: Some(resolved.provider_command.clone()),
            timeout_secs: Some(resolved.provider_timeout.as_secs()),
        },
    };

    let written = config::save_config(&cfg)?;

    println!("Config written to {}", written.display());
    println!("  store.data_dir = {}", data_dir.display());
    println!("  provider.command = {}", resolved.provider_command);
    println!("  provider.timeout_secs = {}", resolved.provider_timeout.as_secs());
    println!();
    println!("Next: run `forest project create <id> --goal \"...\"`.");

    Ok(())
}

fn open_store(config: &ForestConfig) -> DocumentStore {
    DocumentStore::new(config.store.clone(), Arc::new(LockManager::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output (JSON reports).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut overrides = CliOverrides {
        data_dir: cli.data_dir,
        lock_timeout_ms: cli.lock_timeout_ms,
        ..CliOverrides::default()
    };

    match cli.command {
        Commands::Init {
            provider,
            provider_timeout_secs,
            force,
        } => {
            overrides.provider_command = provider;
            overrides.provider_timeout_secs = provider_timeout_secs;
            cmd_init(&overrides, force)?;
        }
        Commands::Project { command } => {
            let resolved = ForestConfig::resolve(&overrides)?;
            project_cmds::run_project_command(command, &open_store(&resolved)).await?;
        }
        Commands::Ingest {
            project_id,
            path,
            goal,
            context,
            file,
        } => {
            let resolved = ForestConfig::resolve(&overrides)?;
            let args = IngestArgs {
                project_id,
                path,
                goal,
                context,
            };
            ingest_cmds::run_ingest(&open_store(&resolved), &args, file.as_deref()).await?;
        }
        Commands::Generate {
            project_id,
            path,
            goal,
            context,
            provider,
            timeout_secs,
        } => {
            overrides.provider_command = provider;
            overrides.provider_timeout_secs = timeout_secs;
            let resolved = ForestConfig::resolve(&overrides)?;
            let args = IngestArgs {
                project_id,
                path,
                goal,
                context,
            };
            ingest_cmds::run_generate(
                &open_store(&resolved),
                &args,
                &resolved.provider_command,
                resolved.provider_timeout,
            )
            .await?;
        }
        Commands::Tree { command } => {
            let resolved = ForestConfig::resolve(&overrides)?;
            tree_cmds::run_tree_command(command, &open_store(&resolved)).await?;
        }
    }

    Ok(())
}

/// Read a response body from `file`, or stdin when `None`.
pub(crate) async fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            use tokio::io::AsyncReadExt;
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
