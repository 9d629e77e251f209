use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use outreach::commands::{self, admin, start::StartOptions};
use outreach::{AppConfig, AppContext};
use outreach_core::{setup_logger, WorkerExit};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Outbound message dispatcher", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/outreach.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise one worker process per eligible profile
    Start {
        #[arg(short, long)]
        group: String,
        /// Upper bound on the number of worker processes
        #[arg(short, long)]
        workers: Option<usize>,
        /// Use every active profile instead of the group's list
        #[arg(long)]
        all_profiles: bool,
        /// Count cycles per run instead of globally
        #[arg(long)]
        session: bool,
    },
    /// Run a single profile's send loop (spawned by `start`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        profile_id: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        run_id: Option<String>,
    },
    Status {
        #[arg(short, long)]
        group: Option<String>,
    },
    ImportTargets {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        file: String,
        #[arg(long)]
        cycles: Option<u32>,
    },
    ImportMessages {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        file: String,
    },
    AddProfile {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
    },
    Proxies {
        #[command(subcommand)]
        action: ProxyCommand,
    },
    /// Return tasks stuck in progress to pending
    ResetStale {
        #[arg(short, long)]
        group: String,
        /// Minutes since the last update
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ProxyCommand {
    /// Add new entries from the proxy file
    Sync {
        #[arg(short, long)]
        file: Option<String>,
    },
    List,
    ResetUnhealthy {
        #[arg(long)]
        hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let log_prefix = match &args.command {
        Commands::Start { .. } => "supervisor".to_string(),
        Commands::Worker { profile_id, .. } => format!("worker-{}", profile_id),
        _ => "outreach".to_string(),
    };
    let _log_guard = setup_logger(&config.dispatch.logging, &log_prefix)?;
    info!("Loaded config from {}", args.config);

    let ctx = AppContext::open(config, &args.config).await?;
    let result = run_command(&ctx, args.command).await;
    ctx.close().await;

    match result {
        Ok(Some(exit)) => {
            drop(_log_guard);
            std::process::exit(exit.code());
        }
        Ok(None) => Ok(()),
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

/// Runs `command`; the worker subcommand yields the exit to report.
async fn run_command(ctx: &AppContext, command: Commands) -> Result<Option<WorkerExit>> {
    match command {
        Commands::Start {
            group,
            workers,
            all_profiles,
            session,
        } => {
            let opts = StartOptions {
                group,
                workers,
                all_profiles,
                session,
            };
            commands::start::run(ctx, opts).await?;
        }
        Commands::Worker {
            profile_id,
            group,
            run_id,
        } => {
            let exit = commands::worker::run(ctx, &profile_id, &group, run_id).await?;
            return Ok(Some(exit));
        }
        Commands::Status { group } => admin::status(ctx, group.as_deref()).await?,
        Commands::ImportTargets {
            group,
            file,
            cycles,
        } => {
            admin::import_targets(ctx, &group, &file, cycles).await?;
        }
        Commands::ImportMessages { group, file } => {
            admin::import_messages(ctx, &group, &file).await?;
        }
        Commands::AddProfile { id, name } => admin::add_profile(ctx, &id, name.as_deref()).await?,
        Commands::Proxies { action } => match action {
            ProxyCommand::Sync { file } => {
                admin::proxies_sync(ctx, file.as_deref()).await?;
            }
            ProxyCommand::List => admin::proxies_list(ctx).await?,
            ProxyCommand::ResetUnhealthy { hours } => {
                admin::proxies_reset_unhealthy(ctx, hours).await?;
            }
        },
        Commands::ResetStale { group, timeout } => {
            admin::reset_stale(ctx, &group, timeout).await?;
        }
    }
    Ok(None)
}
