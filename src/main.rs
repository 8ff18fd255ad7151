use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod db;
mod engine;
#[cfg(test)]
mod fixtures;
mod graph;
mod logging;
mod metrics;
mod models;
mod parser;
mod report;
mod snapshot;
mod store;
mod trend;

use db::PgSurveyStore;
use engine::Analyzer;
use metrics::{CentralityChoice, CommunityChoice, MetricScorer};
use snapshot::{AnalysisSnapshot, SnapshotRecord};
use store::SnapshotStore;

#[derive(Parser)]
#[command(name = "friendship-network")]
#[command(about = "Friendship survey network analysis for classroom teachers", long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo class with one answered survey
    Seed,
    /// Import or update students from a CSV file
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import survey answers from a CSV file
    ImportResponses {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Build the friendship network for a survey and store it
    Analyze {
        #[arg(long)]
        survey: String,
        /// Restrict the roster to these grades instead of the survey's targets
        #[arg(long = "grade")]
        grades: Vec<String>,
        /// Restrict the roster to these classes instead of the survey's targets
        #[arg(long = "class")]
        classes: Vec<String>,
        #[arg(long, value_enum, default_value_t = CentralityChoice::SelectionCount)]
        centrality: CentralityChoice,
        #[arg(long, value_enum, default_value_t = CommunityChoice::DegreeBuckets)]
        community: CommunityChoice,
    },
    /// Print a summary of the stored analysis
    Show {
        #[arg(long)]
        survey: String,
    },
    /// Print one student's place in the stored analysis
    Student {
        #[arg(long)]
        survey: String,
        #[arg(long)]
        student: String,
    },
    /// Generate a markdown report from the stored analysis
    Report {
        #[arg(long)]
        survey: String,
        #[arg(long, default_value = "friendship-report.md")]
        out: PathBuf,
    },
    /// Write the stored analysis record as JSON
    Export {
        #[arg(long)]
        survey: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Compare stored analyses of several surveys, oldest first
    Compare {
        #[arg(long = "survey", required = true, num_args = 1..)]
        surveys: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging()?;
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgSurveyStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStudents { csv } => {
            let upserted = db::import_students(&pool, &csv).await?;
            println!("Upserted {upserted} students from {}.", csv.display());
        }
        Commands::ImportResponses { csv } => {
            let stored = db::import_responses(&pool, &csv).await?;
            println!("Stored {stored} responses from {}.", csv.display());
        }
        Commands::Analyze {
            survey,
            grades,
            classes,
            centrality,
            community,
        } => {
            let mut context = store.load_context(&survey).await?;
            if !grades.is_empty() {
                context.scope.grades = grades;
            }
            if !classes.is_empty() {
                context.scope.classes = classes;
            }

            let analyzer = Analyzer::new(MetricScorer::from_choices(centrality, community));
            let outcome = analyzer.run(&store, &store, &context).await?;
            let snapshot = &outcome.snapshot;

            println!(
                "Analyzed {}: {} students, {} relationships, {} groups.",
                snapshot.survey_id,
                snapshot.nodes.len(),
                snapshot.edges.len(),
                snapshot.communities.len()
            );
            if outcome.parse.truncated_selections > 0 {
                println!(
                    "{} selections beyond a question's maximum were not counted.",
                    outcome.parse.truncated_selections
                );
            }
            let skipped = outcome.parse.malformed_responses + outcome.parse.unknown_respondents;
            if skipped > 0 {
                println!("{skipped} responses were skipped; see the log for details.");
            }
        }
        Commands::Show { survey } => {
            let snapshot = load_snapshot(&store, &survey).await?;
            let metrics = &snapshot.metrics;
            println!(
                "{} analyzed at {}",
                snapshot.survey_id,
                snapshot.calculated_at.to_rfc3339()
            );
            println!(
                "- {} students, {} relationships, density {:.3}, average degree {:.2}",
                metrics.total_students,
                metrics.total_relationships,
                metrics.density,
                metrics.average_degree
            );
            println!(
                "- clustering {:.3}, average path length {:.2}, modularity {:.3}",
                metrics.clustering_coefficient, metrics.average_path_length, metrics.modularity
            );
            for (band, count) in snapshot.type_distribution() {
                println!("- {band}: {count}");
            }
        }
        Commands::Student { survey, student } => {
            let snapshot = load_snapshot(&store, &survey).await?;
            let Some(detail) = snapshot.student_detail(&student) else {
                bail!("student {student} is not part of the analysis for {survey}");
            };
            print!("{}", report::describe_student(&detail, &snapshot));
        }
        Commands::Report { survey, out } => {
            let snapshot = load_snapshot(&store, &survey).await?;
            let title = store.survey_title(&survey).await?;
            let report = report::build_report(&snapshot, title.as_deref());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { survey, out } => {
            let snapshot = load_snapshot(&store, &survey).await?;
            let record = SnapshotRecord::from_snapshot(snapshot);
            std::fs::write(&out, serde_json::to_string_pretty(&record.to_json()?)?)?;
            println!("Analysis exported to {}.", out.display());
        }
        Commands::Compare { surveys, out } => {
            let mut snapshots = Vec::with_capacity(surveys.len());
            for survey in &surveys {
                snapshots.push(load_snapshot(&store, survey).await?);
            }
            let comparison = trend::compare(&snapshots);
            let text = report::build_trend_report(&comparison);
            match out {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    println!("Comparison written to {}.", path.display());
                }
                None => print!("{text}"),
            }
        }
    }

    Ok(())
}

async fn load_snapshot<S: SnapshotStore>(
    store: &S,
    survey_id: &str,
) -> anyhow::Result<AnalysisSnapshot> {
    let Some(record) = store.load(survey_id).await? else {
        bail!("no analysis stored for survey {survey_id}; run `analyze` first");
    };
    Ok(record.into_snapshot()?)
}
