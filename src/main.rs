use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use classroom_early_warning::db::{self, PgMetricProvider};
use classroom_early_warning::models::{ClassRef, DateRange, StudentAlertsResult};
use classroom_early_warning::report;
use classroom_early_warning::{AlertsOptions, AlertsService, Config};

#[derive(Parser)]
#[command(name = "classroom-early-warning")]
#[command(about = "Early-warning alerts for classroom attendance, participation, grades and behavior", long_about = None)]
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
    /// Import participation or exam result rows from CSV files
    #[command(group(
        ArgGroup::new("input")
            .args(["participations", "results"])
            .required(true)
            .multiple(true)
    ))]
    Import {
        #[arg(long)]
        participations: Option<PathBuf>,
        #[arg(long)]
        results: Option<PathBuf>,
    },
    /// Evaluate alerts for one class, or every class when none is given
    Alerts {
        #[arg(long)]
        class: Option<Uuid>,
        /// Label attached to the result; defaults to the stored class name
        #[arg(long, requires = "class")]
        class_name: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        force_refresh: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Behavioral and academic analysis for one student
    Insights {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<Uuid>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classroom_early_warning=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env();
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let provider = Arc::new(PgMetricProvider::new(pool.clone()));
    let service = AlertsService::new(provider.clone(), provider, &config);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import {
            participations,
            results,
        } => {
            if let Some(path) = participations {
                let inserted = db::import_participations(&pool, &path).await?;
                println!("Inserted {inserted} participations from {}.", path.display());
            }
            if let Some(path) = results {
                let inserted = db::import_results(&pool, &path).await?;
                println!("Inserted {inserted} exam results from {}.", path.display());
            }
        }
        Commands::Alerts {
            class,
            class_name,
            start,
            end,
            force_refresh,
            out,
        } => {
            let options = AlertsOptions {
                class_name: None,
                params: Some(DateRange::new(start, end)),
                force_refresh,
            };
            let classes = resolve_classes(&pool, class, class_name).await?;
            let results = service.get_alerts_for_classes(&classes, &options).await?;

            let json = serde_json::to_string_pretty(&results)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Alerts written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Insights {
            student,
            start,
            end,
        } => {
            let insights = service
                .analyze_student(student, &DateRange::new(start, end))
                .await?;
            println!("{}", serde_json::to_string_pretty(&insights)?);
        }
        Commands::Report {
            class,
            start,
            end,
            out,
        } => {
            let options = AlertsOptions {
                params: Some(DateRange::new(start, end)),
                ..Default::default()
            };
            let classes = resolve_classes(&pool, class, None).await?;
            let results: Vec<StudentAlertsResult> =
                service.get_alerts_for_classes(&classes, &options).await?;
            let names = db::student_names(&pool).await?;

            let report = report::build_report(&results, &names);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn resolve_classes(
    pool: &PgPool,
    class: Option<Uuid>,
    class_name: Option<String>,
) -> anyhow::Result<Vec<ClassRef>> {
    let Some(class_id) = class else {
        let classes = db::list_classes(pool).await?;
        info!(classes = classes.len(), "Evaluating every class");
        return Ok(classes);
    };

    let class_name = match class_name {
        Some(name) => Some(name),
        None => db::class_name(pool, class_id)
            .await
            .with_context(|| format!("failed to look up class {class_id}"))?,
    };

    Ok(vec![ClassRef {
        class_id,
        class_name,
    }])
}
