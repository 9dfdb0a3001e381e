//! One-shot operational sub-commands.

use capsule_mail::{compose_test_message, compose_welcome, Transport};
use capsule_store::{CreateCapsule, NewOwner};
use clap::Subcommand;
use tracing::{info, warn};

use crate::App;

#[derive(Subcommand)]
pub enum OwnerAction {
    /// Register a new owner.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// IANA timezone, informational only.
        #[arg(long)]
        timezone: Option<String>,
        /// Also send the welcome email.
        #[arg(long)]
        welcome: bool,
    },
}

#[derive(Subcommand)]
pub enum CapsuleAction {
    /// Create a capsule due on DATE (YYYY-MM-DD).
    Add {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        due: String,
        #[arg(long, default_value = "email")]
        method: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        mood: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// List an owner's capsules.
    List {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        json: bool,
    },
    /// Cancel a pending capsule.
    Cancel {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        id: i64,
    },
}

pub async fn trigger(app: &App, json: bool) -> anyhow::Result<()> {
    let report = app.scheduler.trigger_manually().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "cycle {} ({:?}): {} succeeded, {} failed, {} attempted, {} abandoned",
            report.cycle_id,
            report.outcome,
            report.succeeded,
            report.failed,
            report.attempted,
            report.abandoned
        );
    }
    Ok(())
}

pub async fn send_test(app: &App, to: &str) -> anyhow::Result<()> {
    let message = compose_test_message();
    app.mailer
        .send(to, app.mailer.from_address(), &message.subject, &message.body)
        .await?;
    info!(%to, "test email sent");
    println!("test email sent to {to}");
    Ok(())
}

pub async fn owner(app: &App, action: OwnerAction) -> anyhow::Result<()> {
    match action {
        OwnerAction::Add {
            name,
            email,
            timezone,
            welcome,
        } => {
            let owner = app
                .store
                .create_owner(NewOwner {
                    name,
                    email,
                    timezone: timezone.unwrap_or_default(),
                })
                .await?;
            println!("owner {} created ({})", owner.id, owner.email);

            if welcome {
                let message = compose_welcome(&owner);
                // Registration stands even if the welcome email bounces.
                if let Err(e) = app
                    .mailer
                    .send(&owner.email, app.mailer.from_address(), &message.subject, &message.body)
                    .await
                {
                    warn!(owner_id = owner.id, error = %e, "welcome email failed");
                }
            }
            Ok(())
        }
    }
}

pub async fn capsule(app: &App, action: CapsuleAction) -> anyhow::Result<()> {
    match action {
        CapsuleAction::Add {
            owner,
            title,
            message,
            due,
            method,
            category,
            mood,
            image_url,
        } => {
            let capsule = app
                .store
                .create_capsule(
                    owner,
                    CreateCapsule {
                        title,
                        message,
                        due_date: due,
                        delivery_method: method,
                        category,
                        mood,
                        image_url,
                    },
                )
                .await?;
            println!("capsule {} due {}", capsule.id, capsule.due_at.to_rfc3339());
        }
        CapsuleAction::List { owner, json } => {
            let capsules = app.store.list_capsules(owner).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&capsules)?);
            } else {
                for c in &capsules {
                    println!(
                        "{:>6}  {:<8}  {}  {}",
                        c.id,
                        c.status.as_str(),
                        c.due_at.format("%Y-%m-%d %H:%M UTC"),
                        c.title
                    );
                }
            }
        }
        CapsuleAction::Cancel { owner, id } => {
            app.store.cancel_capsule(id, owner).await?;
            println!("capsule {id} canceled");
        }
    }
    Ok(())
}
