//! borgdash - command-line access to the shared borgmatic configuration.
//!
//! Every command goes through the same store the dashboard uses, so edits
//! made here are locked, backed up and written atomically.

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use commands::*;
use settings::Settings;
use std::path::PathBuf;
use tracing::debug;

use borgdash_store::ConfigStore;

#[derive(Parser)]
#[command(name = "borgdash")]
#[command(author, version, about = "Manage the shared borgmatic configuration", long_about = None)]
struct Cli {
    /// Config file to operate on (default: /etc/borgmatic/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for backup snapshots
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// Seconds to wait for the file lock
    #[arg(long, global = true)]
    lock_timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the config file
    Show {
        /// Print the file exactly as stored, comments included
        #[arg(long, conflicts_with = "json")]
        raw: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one top-level section
    Get {
        /// Section name, e.g. retention
        section: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace one top-level section
    Set {
        /// Section name, e.g. retention
        section: String,
        /// New value as YAML, e.g. '{keep_daily: 7}'
        value: String,
        /// Do not back up the current file first
        #[arg(long)]
        no_backup: bool,
    },
    /// Replace the whole config file
    Write {
        /// File to read the new content from (- for stdin)
        input: PathBuf,
        /// Write even if validation reports errors
        #[arg(long)]
        force: bool,
        /// Do not back up the current file first
        #[arg(long)]
        no_backup: bool,
    },
    /// Check the config file for problems
    Validate {
        /// Validate this file instead of the config file
        file: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List backup snapshots
    Backups {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore the config file from a backup snapshot
    Restore {
        /// Snapshot name as shown by `borgdash backups`
        name: String,
    },
    /// Print external changes to the config file until interrupted
    Watch {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
    /// List built-in templates, or print one
    Templates {
        /// Template name
        name: Option<String>,
    },
    /// Create the config file from a template
    Init {
        /// Template name
        #[arg(short, long, default_value = "basic")]
        template: String,
        /// Replace an existing file (it is backed up first)
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings
    Settings,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, source) = Settings::load()?;
    if let Some(config) = cli.config {
        settings.config_path = config;
    }
    if let Some(dir) = cli.backup_dir {
        settings.store.backup_dir = Some(dir);
    }
    if let Some(secs) = cli.lock_timeout {
        settings.store.lock_timeout = std::time::Duration::from_secs(secs);
    }
    if cli.log_file.is_some() {
        settings.log_file = cli.log_file;
    }

    let log_file = init_logging(cli.verbose, settings.log_level(), settings.log_file.clone());
    debug!(
        config = %settings.config_path.display(),
        settings_file = ?source,
        log_file = ?log_file,
        "Starting borgdash"
    );

    let path = settings.config_path.clone();
    let store = ConfigStore::open(settings.store.clone());

    let result = match cli.command {
        Commands::Show { raw, json } => show_config(&store, &path, raw, json).await,
        Commands::Get { section, json } => get_section(&store, &path, &section, json).await,
        Commands::Set {
            section,
            value,
            no_backup,
        } => set_section(&store, &path, &section, &value, no_backup).await,
        Commands::Write {
            input,
            force,
            no_backup,
        } => write_config(&store, &path, &input, force, no_backup).await,
        Commands::Validate { file, json } => {
            validate_config(&store, &path, file.as_deref(), json).await
        }
        Commands::Backups { json } => list_backups(&store, &path, json).await,
        Commands::Restore { name } => restore_backup(&store, &path, &name).await,
        Commands::Watch { json } => watch_config(&store, &path, json).await,
        Commands::Templates { name } => show_templates(&store, name.as_deref()),
        Commands::Init { template, force } => init_config(&store, &path, &template, force).await,
        Commands::Settings => {
            if let Some(source) = &source {
                eprintln!("Settings file: {}", source.display());
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    };

    store.close().await;
    result
}

fn print_version() {
    println!("borgdash {}", env!("CARGO_PKG_VERSION"));
}
