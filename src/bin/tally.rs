//! tally CLI: operator interface to the consolidation engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tally_rs::config::{Config, Settings};
use tally_rs::db::Db;
use tally_rs::engine::consolidation::signature_tally;
use tally_rs::engine::{ControlLoop, Engine};
use tally_rs::model::{AttachmentId, CurveScope, Granularity, SegmentId, WorkUnitId};
use tally_rs::priority::Segment;
use tally_rs::telemetry::{TelemetryConfig, init_telemetry};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tally", about = "Quorum consolidation for crowd-sourced vote tallies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the consolidation and scheduling loop
    Serve,
    /// Priority curve administration
    Curve {
        #[command(subcommand)]
        action: CurveAction,
    },
    /// Run one pass and print the task queue
    Queue {
        /// Maximum tasks to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the state of a work unit or attachment
    Status {
        #[command(subcommand)]
        target: StatusTarget,
    },
    /// Parse and validate a settings file
    CheckSettings {
        /// Path to the TOML settings file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum CurveAction {
    /// List curve segments
    List {
        /// Only this scope, e.g. `geo_unit:S12` or `default_category`
        #[arg(long)]
        scope: Option<CurveScope>,
    },
    /// Add a segment to a curve
    Add {
        /// Curve scope, e.g. `category:mayor`
        scope: CurveScope,
        /// Lower bound in percent (inclusive)
        from: u32,
        /// Upper bound in percent (exclusive)
        to: u32,
        /// Weight within the range
        weight: u32,
        /// Also apply to units ranked at most this
        #[arg(long)]
        max_rank: Option<u32>,
    },
    /// Remove a segment by id
    Remove {
        /// Segment ID (full UUID)
        id: String,
    },
}

#[derive(Subcommand)]
enum StatusTarget {
    /// A (polling place, category) work unit
    WorkUnit {
        /// Work unit ID (full UUID)
        id: String,
    },
    /// An uploaded tally sheet photo
    Attachment {
        /// Attachment ID (full UUID)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::CheckSettings { file } => cmd_check_settings(file),
        Command::Curve { action } => {
            let engine = open_engine(&Config::from_env()?).await?;
            cmd_curve(&engine, action).await
        }
        Command::Queue { limit } => {
            let engine = open_engine(&Config::from_env()?).await?;
            cmd_queue(&engine, limit).await
        }
        Command::Status { target } => {
            let engine = open_engine(&Config::from_env()?).await?;
            cmd_status(&engine, target).await
        }
    }
}

async fn open_engine(config: &Config) -> anyhow::Result<Engine<Db>> {
    let settings = config.load_settings()?;
    let db = Db::connect(config.require_database_url()?.expose_secret()).await?;
    db.migrate().await?;
    let engine = Engine::new(Arc::new(db), Arc::new(settings));
    engine.seed_curves().await?;
    Ok(engine)
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let engine = open_engine(&config).await?;
    engine.store().health_check().await?;

    let control = ControlLoop::new(Arc::new(engine));

    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    control.run().await?;
    Ok(())
}

fn cmd_check_settings(file: PathBuf) -> anyhow::Result<()> {
    let settings = Settings::load(&file)?;
    println!("{}: ok", file.display());
    println!(
        "Quorum:      identification {}, problem {}, count {}",
        settings.quorum.identification,
        settings.quorum.identification_problem,
        settings.quorum.count
    );
    println!(
        "Scheduler:   ratio {}, pass every {}s, lease {}",
        settings.scheduler.interleave_ratio,
        settings.scheduler.pass_interval_secs,
        settings
            .scheduler
            .task_lease_secs
            .map(|s| format!("{s}s"))
            .unwrap_or("-".to_string())
    );
    println!(
        "Anti-troll:  {} (threshold {})",
        if settings.antitroll.enabled { "on" } else { "off" },
        settings.antitroll.threshold
    );
    println!("Curves:      {} segment(s)", settings.curves.initial_segments().len());
    Ok(())
}

async fn cmd_curve(engine: &Engine<Db>, action: CurveAction) -> anyhow::Result<()> {
    match action {
        CurveAction::List { scope } => {
            let segments = engine.curve_segments(scope.as_ref()).await?;
            if segments.is_empty() {
                println!("No curve segments found.");
                return Ok(());
            }
            println!("{:<8}  {:<28}  {:<14}  {:<8}  MAX_RANK", "ID", "SCOPE", "RANGE", "WEIGHT");
            println!("{}", "-".repeat(72));
            for s in &segments {
                println!(
                    "{:<8}  {:<28}  {:<14}  {:<8}  {}",
                    s.id.to_string(),
                    s.scope.to_string(),
                    s.segment.range(),
                    s.segment.weight,
                    s.segment
                        .max_rank
                        .map(|r| r.to_string())
                        .unwrap_or("-".to_string())
                );
            }
            println!("\n{} segment(s)", segments.len());
        }
        CurveAction::Add {
            scope,
            from,
            to,
            weight,
            max_rank,
        } => {
            let mut segment = Segment::new(from, to, weight)?;
            if let Some(rank) = max_rank {
                segment = segment.with_max_rank(rank);
            }
            let stored = engine.add_curve_segment(scope, segment).await?;
            println!("Added: {} ({} {})", stored.id.0, stored.scope, stored.segment);
        }
        CurveAction::Remove { id } => {
            let removed = engine
                .remove_curve_segment(SegmentId(Uuid::parse_str(&id)?))
                .await?;
            println!("Removed: {} ({} {})", removed.id.0, removed.scope, removed.segment);
        }
    }
    Ok(())
}

async fn cmd_queue(engine: &Engine<Db>, limit: usize) -> anyhow::Result<()> {
    let report = engine.run_pass().await?;
    let tasks = engine.queue_snapshot().await;
    println!(
        "Pass: {} target(s) consolidated, {} transition(s), {} unit(s) rescheduled",
        report.consolidated, report.transitions, report.rescheduled
    );
    if tasks.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<10}  {:<30}  {:<7}  KEY", "KIND", "TARGET", "REPLICA");
    println!("{}", "-".repeat(64));
    for task in tasks.iter().take(limit) {
        println!(
            "{:<10}  {:<30}  {:<7}  {}",
            task.kind().to_string(),
            task.target.to_string(),
            task.replica,
            task.scheduling_key
        );
    }
    println!(
        "\n{} identification, {} transcription task(s)",
        report.queue.identification_tasks, report.queue.transcription_tasks
    );
    Ok(())
}

async fn cmd_status(engine: &Engine<Db>, target: StatusTarget) -> anyhow::Result<()> {
    match target {
        StatusTarget::WorkUnit { id } => {
            let unit = engine.work_unit(WorkUnitId(Uuid::parse_str(&id)?)).await?;
            println!("ID:         {}", unit.id.0);
            println!("Place:      {}", unit.place.0);
            println!("Geo Unit:   {}", unit.geo_unit);
            println!("Category:   {}", unit.category);
            println!("Status:     {}", unit.status);
            match unit.eligible_at {
                Some(at) => println!("Eligible:   {at}"),
                None => println!("Eligible:   -"),
            }
            if let Some(scheduling) = unit.scheduling {
                println!(
                    "Priority:   key {} (geo rank {} at {:.1}%, category rank {} at {:.1}%)",
                    scheduling.key,
                    scheduling.geo.rank,
                    scheduling.geo.proportion,
                    scheduling.category.rank,
                    scheduling.category.proportion
                );
            }

            let claims = engine.count_claims(unit.id).await?;
            for granularity in [Granularity::Partial, Granularity::Total] {
                let tally = signature_tally(&claims, granularity);
                if tally.is_empty() {
                    continue;
                }
                println!("--- {granularity} claims");
                for (signature, count) in &tally {
                    println!("  {count} x {signature}");
                }
            }

            if let Some(confirmed) = engine.confirmed_count(unit.id).await? {
                println!("--- confirmed ({}, {})", confirmed.granularity, confirmed.origin);
                for line in &confirmed.lines {
                    println!("  {:<20}  {}", line.option.to_string(), line.count);
                }
            }
        }
        StatusTarget::Attachment { id } => {
            let attachment = engine
                .attachment(AttachmentId(Uuid::parse_str(&id)?))
                .await?;
            println!("ID:         {}", attachment.id.0);
            println!("Status:     {}", attachment.status);
            println!(
                "Place:      {}",
                attachment
                    .place
                    .map(|p| p.0.to_string())
                    .unwrap_or("-".to_string())
            );
            println!(
                "Hint:       {}",
                attachment
                    .geo_unit_hint
                    .as_ref()
                    .map(|g| g.to_string())
                    .unwrap_or("-".to_string())
            );
            println!("Uploaded:   {}", attachment.uploaded_at);
        }
    }
    Ok(())
}
