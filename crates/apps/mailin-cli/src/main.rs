//! mailin - operate a mail store from the command line
//!
//! Drains the Maildir inbox into the dated store, inspects and pops the
//! pending queue, audits the store against its index, and writes a
//! starting config file.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use mailin::{DrainOptions, MailinConfig, MessageId, MessageSink, MessageStore, PendingQueue};

#[derive(Parser)]
#[command(name = "mailin")]
#[command(about = "Durable inbound mail store and pending queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of ~/.config/mailin/mailin.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (holds Maildir/ and the databases)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Index database path
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Pending queue database path
    #[arg(long, global = true)]
    pending: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file from the current environment and flags
    Init {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Admit inbox messages into the store and queue them
    Drain {
        /// Stop after this many messages (0 means all)
        #[arg(short, long)]
        limit: Option<usize>,
        /// List what would be drained without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Do not push drained messages onto the pending queue
        #[arg(long)]
        no_queue: bool,
    },
    /// Remove and print identifiers from the head of the pending queue
    Pop {
        #[arg(default_value = "1")]
        count: usize,
    },
    /// List the pending queue without consuming it
    Pending,
    /// Write a stored message to stdout
    Show { message_id: String },
    /// Drop a message from the pending queue
    Unqueue { message_id: String },
    /// Compare the index with the Maildir folders
    Audit,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<MailinConfig> {
    let mut cfg = match &cli.config {
        Some(path) => MailinConfig::from_file(path)?,
        None => MailinConfig::load()?,
    };
    apply_flags(cli, &mut cfg);
    Ok(cfg)
}

fn apply_flags(cli: &Cli, cfg: &mut MailinConfig) {
    if let Some(store) = &cli.store {
        cfg.store_path = Some(store.clone());
    }
    if let Some(index) = &cli.index {
        cfg.index_db = Some(index.clone());
    }
    if let Some(pending) = &cli.pending {
        cfg.pending_db = Some(pending.clone());
    }
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => MailinConfig::default_config_path()
            .context("Could not determine config directory")?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    let mut cfg = MailinConfig::default();
    cfg.apply_env()?;
    apply_flags(cli, &mut cfg);

    match &cli.config {
        Some(path) => cfg.save_to(path)?,
        None => {
            cfg.save()?;
        }
    }
    info!("Wrote config to {}", path.display());
    Ok(())
}

fn open_store(cfg: &MailinConfig) -> Result<MessageStore> {
    let path = cfg.store_path()?;
    MessageStore::open_with_index(&path, cfg.index_db_path()?)
        .with_context(|| format!("Failed to open store at {}", path.display()))
}

fn open_queue(cfg: &MailinConfig) -> Result<PendingQueue> {
    let path = cfg.pending_db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    PendingQueue::open(&path)
        .with_context(|| format!("Failed to open pending queue at {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        return init_config(&cli, force);
    }

    let cfg = load_config(&cli)?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Drain {
            limit,
            dry_run,
            no_queue,
        } => {
            let store = open_store(&cfg)?;
            let queue = if no_queue { None } else { Some(open_queue(&cfg)?) };
            let sink = queue.as_ref().map(|q| q as &dyn MessageSink);
            let options = DrainOptions::new()
                .limit(limit.or(cfg.drain_limit))
                .dry_run(dry_run);

            let mut drain = store.drain_inbox(sink, options)?;
            for message_id in drain.by_ref() {
                writeln!(out, "{}", message_id?)?;
            }
            info!("Drained {} messages", drain.drained());
        }
        Commands::Pop { count } => {
            let queue = open_queue(&cfg)?;
            for message_id in queue.pop(count)? {
                writeln!(out, "{}", message_id)?;
            }
        }
        Commands::Pending => {
            let queue = open_queue(&cfg)?;
            for entry in queue.iter() {
                let entry = entry?;
                writeln!(out, "{}\t{}", entry.sequence, entry.message_id)?;
            }
        }
        Commands::Show { message_id } => {
            let store = open_store(&cfg)?;
            let raw = store.get(&MessageId::new(message_id))?;
            out.write_all(&raw)?;
        }
        Commands::Unqueue { message_id } => {
            let queue = open_queue(&cfg)?;
            queue.remove(&MessageId::new(message_id))?;
        }
        Commands::Audit => {
            let store = open_store(&cfg)?;
            let report = store.audit()?;
            for record in &report.dangling {
                writeln!(
                    out,
                    "dangling\t{}\t{}\t{}",
                    record.message_id, record.folder, record.blob_key
                )?;
            }
            for (folder, key) in &report.orphaned {
                writeln!(out, "orphaned\t{}\t{}", folder, key)?;
            }
            if !report.is_clean() {
                bail!(
                    "{} dangling index entries, {} unindexed blobs",
                    report.dangling.len(),
                    report.orphaned.len()
                );
            }
            info!("Store is consistent");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_drain_flags() {
        let cli = Cli::parse_from(["mailin", "drain", "--limit", "5", "--dry-run", "--store", "/srv/mail"]);
        assert_eq!(cli.store, Some(PathBuf::from("/srv/mail")));
        match cli.command {
            Commands::Drain {
                limit,
                dry_run,
                no_queue,
            } => {
                assert_eq!(limit, Some(5));
                assert!(dry_run);
                assert!(!no_queue);
            }
            _ => panic!("expected drain"),
        }
    }

    #[test]
    fn test_pop_defaults_to_one() {
        let cli = Cli::parse_from(["mailin", "pop"]);
        assert!(matches!(cli.command, Commands::Pop { count: 1 }));
    }

    #[test]
    fn test_parse_init() {
        let cli = Cli::parse_from(["mailin", "init", "--force", "--config", "/tmp/mailin.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mailin.json")));
        assert!(matches!(cli.command, Commands::Init { force: true }));
    }

    #[test]
    fn test_init_writes_flags_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailin.json");
        let path_arg = path.to_str().unwrap();
        let cli = Cli::parse_from(["mailin", "init", "--config", path_arg, "--store", "/srv/mail"]);

        init_config(&cli, false).unwrap();
        let written = MailinConfig::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.store_path, Some(PathBuf::from("/srv/mail")));

        assert!(init_config(&cli, false).is_err());
        init_config(&cli, true).unwrap();
    }
}
