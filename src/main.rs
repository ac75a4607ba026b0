use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herd_health_sync::config::AppConfig;
use herd_health_sync::models::format_timestamp;
use herd_health_sync::state::{DashboardState, StateReader};
use herd_health_sync::{db, predict, reconcile, report, runtime, session, store};

#[derive(Parser)]
#[command(name = "herd-health-sync")]
#[command(about = "Live livestock health feed and alert ranking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the document store schema
    InitDb,
    /// Load a sample herd for a user
    Seed {
        #[arg(long)]
        principal: String,
    },
    /// Send sensor readings from a CSV file to the prediction backend
    Submit {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        principal: Option<String>,
    },
    /// Follow a user's herd and print the ranked alert feed until Ctrl-C
    Watch {
        /// Sign in as this user instead of anonymously
        #[arg(long)]
        principal: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown herd report
    Report {
        #[arg(long)]
        principal: String,
        #[arg(long, default_value = "herd-report.md")]
        out: PathBuf,
    },
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("herd_health_sync=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed { principal } => {
            let pool = connect(&config).await?;
            let path = store::collection_path(&config.app_id, &principal);
            let inserted = db::seed(&pool, &path).await?;
            println!("Seeded {inserted} animals into {path}.");
        }
        Commands::Submit { csv, principal } => {
            let readings = predict::load_readings(&csv)?;
            let mut client = predict::PredictionClient::new(config.predict_url.clone());
            if let Some(principal) = principal {
                client = client.with_principal(principal);
            }

            let mut failed = 0usize;
            for reading in readings.iter().cloned() {
                let label = reading.cattle_id.clone().unwrap_or_else(|| "Unknown".to_string());
                match client.submit(&reading.into_features()).await {
                    Ok(response) => {
                        let results = &response.monitoring_results;
                        println!(
                            "- {}: {} (risk {}, confidence {}), {} alerts",
                            label,
                            results.health_status.as_deref().unwrap_or("unknown"),
                            results.risk_level.as_deref().unwrap_or("unknown"),
                            results.confidence.as_deref().unwrap_or("n/a"),
                            response.alerts.len()
                        );
                    }
                    Err(err) => {
                        failed += 1;
                        println!("- {label}: submission failed: {err}");
                    }
                }
            }
            println!(
                "Submitted {} readings from {} ({} failed).",
                readings.len(),
                csv.display(),
                failed
            );
        }
        Commands::Watch { principal, limit } => {
            let pool = connect(&config).await?;
            let (identity, events) = session::LocalIdentity::channel();
            let (dashboard, reader) =
                runtime::Dashboard::new(db::PgDocumentStore::new(pool), config.app_id.clone());
            let printer = tokio::spawn(print_feed(reader, limit));

            // Failures are reported to the dashboard through the identity events.
            let signed_in = match principal.as_deref() {
                Some(token) => identity.sign_in_with_token(token),
                None => identity.sign_in_anonymous(),
            };
            if let Err(err) = signed_in {
                tracing::warn!(error = %err, "continuing without a signed-in user");
            }

            dashboard
                .run(events, async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %err, "failed to listen for Ctrl-C");
                    }
                })
                .await;
            drop(identity);
            printer.await.context("feed printer panicked")?;
        }
        Commands::Report { principal, out } => {
            let pool = connect(&config).await?;
            let path = store::collection_path(&config.app_id, &principal);
            let documents = db::fetch_collection(&pool, &path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let reconciled = reconcile::reconcile(&documents);
            let state = DashboardState {
                principal: Some(principal.clone()),
                identity_resolved: true,
                records: reconciled.records,
                alerts: reconciled.alerts,
                loading: false,
                error: None,
            };
            let report = report::build_report(Some(&principal), &state);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn print_feed(mut reader: StateReader, limit: usize) {
    while reader.changed().await {
        let state = reader.latest();
        if !state.identity_resolved || state.loading {
            continue;
        }
        if let Some(error) = &state.error {
            println!("! {error}");
        }

        let user = state.principal.as_deref().unwrap_or("nobody");
        println!(
            "{} animals, {} active alerts for {}",
            state.records.len(),
            state.alerts.len(),
            user
        );
        for alert in state.alerts.iter().take(limit) {
            println!(
                "  [{}] {} at {}: {} ({})",
                alert.severity.map(|s| s.as_str()).unwrap_or("Unrated"),
                alert.cattle_id,
                format_timestamp(alert.timestamp),
                alert.message,
                alert.disease
            );
        }
    }
}
