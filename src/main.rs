use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod alerts;
mod db;
mod error;
mod forecast;
mod models;
mod resolver;
mod risk;
mod scheduler;
mod series;
mod sms;

use forecast::{ForecastStore, SharedForecastStore};
use models::Cadence;
use resolver::Resolver;
use sms::{Dispatcher, Fast2Sms};

#[derive(Parser)]
#[command(name = "denguewatch")]
#[command(about = "Dengue case forecasting and SMS alert pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import case records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Train models and run the alert scheduler
    Serve,
    /// Resolve the case count for a location and month
    Predict {
        #[arg(long)]
        location: String,
        #[arg(long)]
        month: String,
        #[arg(long)]
        year: i32,
    },
    /// List known locations
    Locations,
    /// Register a subscriber for alerts
    Subscribe {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        mobile: String,
        #[arg(long)]
        location: String,
        #[arg(long, default_value = "weekly")]
        cadence: String,
    },
    /// Remove a subscriber
    Unsubscribe {
        #[arg(long)]
        email: String,
    },
    /// Change a subscriber's alert cadence
    SetCadence {
        #[arg(long)]
        email: String,
        #[arg(long)]
        cadence: String,
    },
    /// List subscribers
    Subscribers,
    /// Show recent dispatch attempts
    AlertLog {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Send a test SMS to verify gateway configuration
    TestSms {
        #[arg(long)]
        to: String,
    },
}

fn sms_dispatcher() -> anyhow::Result<Dispatcher<Fast2Sms>> {
    let api_key =
        std::env::var("FAST2SMS_API_KEY").context("FAST2SMS_API_KEY must be set to send SMS")?;
    let sender_id =
        std::env::var("FAST2SMS_SENDER_ID").unwrap_or_else(|_| "FSTSMS".to_string());
    Ok(Dispatcher::new(Fast2Sms::new(api_key, sender_id)))
}

async fn trained_store(pool: &PgPool) -> anyhow::Result<SharedForecastStore> {
    let records = db::load_case_records(pool).await?;
    anyhow::ensure!(
        !records.is_empty(),
        "no case records loaded; run `seed` or `import` first"
    );
    Ok(SharedForecastStore::new(ForecastStore::train(&records)))
}

fn parse_cadence(value: &str) -> anyhow::Result<Cadence> {
    Cadence::parse(value)
        .with_context(|| format!("invalid cadence '{value}' (expected daily, weekly or monthly)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_cases(&pool, &csv).await?;
            println!("Inserted {inserted} case records from {}.", csv.display());
        }
        Commands::Serve => {
            let store = trained_store(&pool).await?;
            let resolver = Resolver::new(store.clone());
            let dispatcher = sms_dispatcher()?;
            let snapshot = store.snapshot();
            for location in snapshot.low_confidence_locations() {
                println!("Warning: limited data points for {location}, accuracy may be low.");
            }
            drop(snapshot);
            println!("Models trained for: {}", resolver.locations().join(", "));
            println!("Scheduler running; Ctrl-C to stop.");

            #[cfg(unix)]
            spawn_reload_on_hangup(pool.clone(), store.clone());

            scheduler::run_loop(pool, resolver, dispatcher, scheduler::SystemClock).await?;
        }
        Commands::Predict {
            location,
            month,
            year,
        } => {
            let store = trained_store(&pool).await?;
            let resolver = Resolver::new(store);
            let result = resolver.resolve(&location, &month, year)?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if result.cases > risk::OUTBREAK_THRESHOLD {
                let dispatcher = sms_dispatcher()?;
                let alerted =
                    alerts::trigger_outbreak(&pool, &dispatcher, &location, result.cases).await?;
                println!("Outbreak alert sent to {alerted} subscriber(s) in {location}.");
            }
        }
        Commands::Locations => {
            let locations = db::distinct_locations(&pool).await?;
            if locations.is_empty() {
                println!("No case records loaded yet.");
            }
            for location in locations {
                println!("- {location}");
            }
        }
        Commands::Subscribe {
            name,
            email,
            mobile,
            location,
            cadence,
        } => {
            anyhow::ensure!(email.contains('@'), "invalid email format");
            anyhow::ensure!(
                mobile.chars().all(|c| c.is_ascii_digit()) && mobile.len() >= 10,
                "invalid mobile number"
            );
            let cadence = parse_cadence(&cadence)?;

            match db::insert_subscriber(&pool, &name, &email, &mobile, &location, cadence).await? {
                db::SubscribeOutcome::AlreadySubscribed => {
                    println!("You are already subscribed!");
                }
                db::SubscribeOutcome::Subscribed(subscriber) => {
                    let dispatcher = sms_dispatcher()?;
                    let message = alerts::compose_welcome_message(
                        &subscriber.name,
                        cadence,
                        &subscriber.location,
                    );
                    let outcome = dispatcher.send(&subscriber.mobile, &message).await;
                    let attempt = alerts::attempt_from_outcome(
                        Some(subscriber.id),
                        alerts::WELCOME_ALERT_TYPE,
                        message,
                        &outcome,
                    );
                    alerts::persist_attempts(&pool, &[attempt], false).await;
                    println!(
                        "Subscribed {} to {cadence} alerts for {}.",
                        subscriber.email, subscriber.location
                    );
                }
            }
        }
        Commands::Unsubscribe { email } => match db::subscriber_by_email(&pool, &email).await? {
            None => println!("No subscriber found for {email}."),
            Some(subscriber) => {
                let dispatcher = sms_dispatcher()?;
                if let Some(attempt) =
                    alerts::deliver_goodbye(Some(&subscriber), &dispatcher).await
                {
                    alerts::persist_attempts(&pool, &[attempt], false).await;
                }
                db::delete_subscriber(&pool, &email).await?;
                println!("Unsubscribed {email}.");
            }
        },
        Commands::SetCadence { email, cadence } => {
            let cadence = parse_cadence(&cadence)?;
            if db::update_cadence(&pool, &email, cadence).await? {
                println!("Cadence for {email} set to {cadence}.");
            } else {
                println!("No subscriber found for {email}.");
            }
        }
        Commands::Subscribers => {
            let subscribers = db::list_subscribers(&pool).await?;
            if subscribers.is_empty() {
                println!("No subscribers registered.");
            }
            for subscriber in subscribers {
                let last = subscriber
                    .last_alert_sent
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "- {} ({}, {}) {} alerts since {}, last alert {last}",
                    subscriber.name,
                    subscriber.email,
                    subscriber.location,
                    subscriber.cadence,
                    subscriber.subscribed_at.to_rfc3339()
                );
            }
        }
        Commands::AlertLog { limit } => {
            let entries = db::recent_alert_logs(&pool, limit).await?;
            if entries.is_empty() {
                println!("No dispatch attempts recorded.");
            }
            for entry in entries {
                let who = match (&entry.subscriber_name, &entry.subscriber_email) {
                    (Some(name), Some(email)) => format!("{name} <{email}>"),
                    _ => entry
                        .subscriber_id
                        .map(|id| format!("former subscriber {id}"))
                        .unwrap_or_else(|| "unmatched subscriber".to_string()),
                };
                let detail = entry
                    .error_detail
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default();
                println!(
                    "- {} [{}] {} to {who}: {}{detail}",
                    entry.id,
                    entry.sent_at.to_rfc3339(),
                    entry.alert_type,
                    entry.status
                );
            }
        }
        Commands::TestSms { to } => {
            let dispatcher = sms_dispatcher()?;
            let outcome = dispatcher.send(&to, alerts::TEST_MESSAGE).await;
            if outcome.success {
                println!(
                    "Test SMS accepted by gateway (message id {}).",
                    outcome.message_id.unwrap_or_else(|| "N/A".to_string())
                );
            } else {
                println!(
                    "Test SMS failed: {}",
                    outcome.error_detail.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
    }

    Ok(())
}

/// SIGHUP triggers a full retrain from the current case records; the new
/// snapshot replaces the old one in a single swap.
#[cfg(unix)]
fn spawn_reload_on_hangup(pool: PgPool, store: SharedForecastStore) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(err) => {
                error!(%err, "could not install SIGHUP handler, reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, retraining forecast models");
            match db::load_case_records(&pool).await {
                Ok(records) => {
                    store.swap(ForecastStore::train(&records));
                    info!(locations = store.snapshot().len(), "forecast models rebuilt");
                }
                Err(err) => error!(%err, "reload failed, keeping current models"),
            }
        }
    });
}
