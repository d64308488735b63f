//! Reposync CLI - command line interface for the repository synchronization engine
//!
//! Every subcommand exits non-zero on failure after alerting through the
//! configured alert command (or the log when none is configured).

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reposync_core::{
    report, Alerter, CommandAlerter, Config, Severity, SharedRootContext, SyncEngine, TracingAlerter,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{CommitAndPushArgs, MergeArgs, PullArgs, PushArgs, SyncArgs, UpdateSubmodulePointerArgs};

/// Reposync: keep deploy workspaces in step with their upstream repositories
#[derive(Parser, Debug)]
#[command(name = "reposync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/reposync/config.toml)
    #[arg(long, global = true, env = "REPOSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Shared root holding canonical mirrors and locks (overrides config and env)
    #[arg(long, global = true)]
    shared_root: Option<PathBuf>,

    /// Trunk branch name (overrides config and env)
    #[arg(long, global = true)]
    trunk: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring a workspace to a revision
    Sync(SyncArgs),

    /// Sync a workspace to the trunk or a remote branch
    Pull(PullArgs),

    /// Push the current branch of a working tree
    Push(PushArgs),

    /// Commit everything in a working tree and push it
    CommitAndPush(CommitAndPushArgs),

    /// Merge a branch into a deploy branch and push it
    Merge(MergeArgs),

    /// Fast-forward a submodule to the trunk and push the new pointer
    UpdateSubmodulePointer(UpdateSubmodulePointerArgs),

    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match Config::load_with_overrides(cli.config.as_deref(), cli.shared_root.clone(), cli.trunk.clone()) {
        Ok(config) => config,
        Err(e) => {
            report::<()>(&Err(e), &TracingAlerter);
            return ExitCode::FAILURE;
        }
    };

    if cli.verbose {
        tracing::info!(
            shared_root = %config.shared_root.display(),
            remote = %config.remote,
            trunk = %config.trunk,
            "Configuration loaded"
        );
    }

    if let Commands::Config = cli.command {
        print_config(&config);
        return ExitCode::SUCCESS;
    }

    let alerter: Box<dyn Alerter> = match &config.alert.command {
        Some(command) => Box::new(CommandAlerter::new(command.as_str())),
        None => Box::new(TracingAlerter),
    };

    let ctx = match open_context(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            alerter.alert(Severity::Error, &format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };
    let engine = SyncEngine::new(&ctx);

    let result = match &cli.command {
        Commands::Sync(args) => args.execute(&engine),
        Commands::Pull(args) => args.execute(&engine),
        Commands::Push(args) => args.execute(&engine),
        Commands::CommitAndPush(args) => args.execute(&engine),
        Commands::Merge(args) => args.execute(&engine),
        Commands::UpdateSubmodulePointer(args) => args.execute(&engine),
        Commands::Config => Ok(()),
    };

    if report(&result, alerter.as_ref()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_context(config: Config) -> anyhow::Result<SharedRootContext> {
    let root = config.shared_root.clone();
    SharedRootContext::new(config)
        .with_context(|| format!("Failed to prepare shared root {}", root.display()))
}

fn print_config(config: &Config) {
    println!("Reposync Configuration");
    println!("======================");
    println!();
    println!("  shared_root: {}", config.shared_root.display());
    println!("  remote: {}", config.remote);
    println!("  trunk: {}", config.trunk);
    if config.workdir_linked_submodules.is_empty() {
        println!("  workdir_linked_submodules: (none)");
    } else {
        println!("  workdir_linked_submodules:");
        for path in &config.workdir_linked_submodules {
            println!("    - {}", path);
        }
    }
    println!(
        "  alert command: {}",
        config.alert.command.as_deref().unwrap_or("(log only)")
    );
    println!();
    println!("Timeouts:");
    let t = &config.timeouts;
    println!("  lock_wait: {:?}", t.lock_wait);
    println!("  fetch: {:?}", t.fetch);
    println!("  clone: {:?}", t.clone);
    println!("  push: {:?}", t.push);
    println!("  submodule_update: {:?}", t.submodule_update);
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
