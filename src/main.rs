use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use groupscholar_completion_status::config::Config;
use groupscholar_completion_status::models::ActivityId;
use groupscholar_completion_status::{db, report, resolve, ResolutionCache};

#[derive(Parser)]
#[command(name = "completion-status")]
#[command(about = "Activity completion status for Group Scholar guardian pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample course with evidence
    Seed,
    /// Import evidence rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Resolve one activity for one student and print it as JSON
    Resolve {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: i64,
        #[arg(long)]
        activity: i64,
        #[arg(long)]
        pretty: bool,
    },
    /// Generate a markdown progress report for one student
    Report {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: i64,
        #[arg(long, default_value = "progress.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config.log_filter)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            tracing::info!("Schema ready");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            tracing::info!("Seed data inserted");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} evidence rows from {}.", csv.display());
        }
        Commands::Resolve {
            email,
            course,
            activity,
            pretty,
        } => {
            let student_id = db::find_student(&pool, &email).await?;
            let snapshot = db::load_snapshot(&pool, course, student_id).await?;
            let activity = snapshot
                .activity(ActivityId(activity))
                .with_context(|| format!("activity {activity} is not part of course {course}"))?;

            let status = resolve(&snapshot, activity, student_id)
                .with_context(|| format!("could not resolve activity {}", activity.id))?;
            let json = if pretty {
                serde_json::to_string_pretty(&status)?
            } else {
                serde_json::to_string(&status)?
            };
            println!("{json}");
        }
        Commands::Report { email, course, out } => {
            let student_id = db::find_student(&pool, &email).await?;
            let title = db::fetch_course_title(&pool, course).await?;
            let snapshot = db::load_snapshot(&pool, course, student_id).await?;

            let mut cache = ResolutionCache::new();
            let rows = report::collect_rows(
                &snapshot,
                &snapshot.top_level_activities(),
                student_id,
                &mut cache,
            );
            tracing::debug!(
                rows = rows.len(),
                cache_hits = cache.hits(),
                cache_misses = cache.misses(),
                "report rows resolved"
            );

            let report = report::build_report(&email, &title, &rows);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}
