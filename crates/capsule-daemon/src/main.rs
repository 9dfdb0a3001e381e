use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capsule_core::{resolve_timezone, CapsuleConfig, SystemClock};
use capsule_mail::SmtpMailer;
use capsule_scheduler::{DeliveryCycle, Scheduler, SchedulerSettings};
use capsule_store::SqliteCapsuleStore;
use clap::{Parser, Subcommand};
use tracing::info;

mod commands;

/// Time capsule delivery daemon.
#[derive(Parser)]
#[command(name = "capsule-daemon", version, about)]
struct Cli {
    /// Config file (falls back to CAPSULE_CONFIG, then ~/.capsule/capsule.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C / SIGTERM (default).
    Run,
    /// Run one delivery cycle now and print its report.
    Trigger {
        #[arg(long)]
        json: bool,
    },
    /// Send the SMTP configuration test message.
    SendTest {
        #[arg(long)]
        to: String,
    },
    /// Manage capsule owners.
    Owner {
        #[command(subcommand)]
        action: commands::OwnerAction,
    },
    /// Manage capsules.
    Capsule {
        #[command(subcommand)]
        action: commands::CapsuleAction,
    },
}

/// Everything a command needs, built once from config.
pub struct App {
    pub config: CapsuleConfig,
    pub store: SqliteCapsuleStore,
    pub mailer: Arc<SmtpMailer>,
    pub scheduler: Scheduler,
}

impl App {
    fn build(config: CapsuleConfig) -> anyhow::Result<Self> {
        let tz = resolve_timezone(&config.scheduler.timezone);
        let conn = capsule_store::db::open(&config.database.path)
            .with_context(|| format!("failed to open database {}", config.database.path))?;
        let store = SqliteCapsuleStore::new(conn, tz, Arc::new(SystemClock));
        let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));

        let cycle = DeliveryCycle::new(
            Arc::new(store.clone()),
            mailer.clone(),
            config.smtp.from.clone(),
            Duration::from_secs(config.scheduler.cycle_deadline_secs),
        )
        .with_timezone(tz);
        let scheduler = Scheduler::new(
            SchedulerSettings::from_config(&config.scheduler),
            Arc::new(cycle),
        );

        Ok(Self {
            config,
            store,
            mailer,
            scheduler,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "capsule_daemon=info,capsule_scheduler=info,capsule_store=info,capsule_mail=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > CAPSULE_CONFIG env > ~/.capsule/capsule.toml
    let config_path = cli.config.or_else(|| std::env::var("CAPSULE_CONFIG").ok());
    let config = CapsuleConfig::load(config_path.as_deref())
        .context("invalid configuration, refusing to start")?;
    let app = App::build(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&app).await,
        Command::Trigger { json } => commands::trigger(&app, json).await,
        Command::SendTest { to } => commands::send_test(&app, &to).await,
        Command::Owner { action } => commands::owner(&app, action).await,
        Command::Capsule { action } => commands::capsule(&app, action).await,
    }
}

async fn run(app: &App) -> anyhow::Result<()> {
    app.scheduler.start()?;
    info!(
        database = %app.config.database.path,
        smtp_host = %app.config.smtp.host,
        "capsule daemon running, press Ctrl+C to stop"
    );

    shutdown_signal().await;
    info!("shutdown signal received");

    // A drain timeout is fatal: the error propagates and the exit code is non-zero.
    app.scheduler.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
