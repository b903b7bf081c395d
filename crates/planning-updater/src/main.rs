use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use planning_types::CustomEvent;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planning_updater::custom::{self, CustomSelector};
use planning_updater::download::CalendarDownloader;
use planning_updater::inspect::inspect;
use planning_updater::store::{live_collection, EventStore, MemoryStore, MongoStore};
use planning_updater::{Params, Scheduler, Updater};

#[derive(Parser)]
#[command(name = "planning-updater")]
#[command(about = "Keep timetable collections in step with iCalendar feeds")]
#[command(
    long_about = "Downloads the iCalendar feeds of every group of every branch, merges the\n\
    events shared between groups, and reconciles them with one MongoDB collection\n\
    per branch. Events that disappear from the feeds are moved to an archive\n\
    collection, changes to tracked fields are kept in each event's history."
)]
struct Cli {
    /// JSON parameter file describing the updater, database and branches.
    #[arg(short, long, default_value = "params.json", env = "PLANNING_PARAMS")]
    params: PathBuf,

    /// Database host, overrides the parameter file.
    #[arg(long, env = "PLANNING_DB_HOST", value_name = "HOST")]
    db_host: Option<String>,

    /// Database port, overrides the parameter file.
    #[arg(long, env = "PLANNING_DB_PORT", value_name = "PORT")]
    db_port: Option<u16>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reconciliation passes (default command)
    ///
    /// Runs a first pass immediately, then one pass every `frequency`
    /// seconds after the previous one ends, until the error tolerance is
    /// reached or Ctrl-C is pressed.
    Run(RunArgs),

    /// Print the event count and date range of a calendar file or URL
    Inspect {
        /// Local .ics file, or an http(s) address
        #[arg(value_name = "FILE|URL")]
        source: String,
    },

    /// Manage manually entered events
    Custom {
        #[command(subcommand)]
        action: CustomAction,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Run a single pass, ignoring the configured frequency.
    #[arg(long)]
    once: bool,

    /// Reconcile into memory and print the merged events as JSON.
    /// Implies --once and never connects to the database.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum CustomAction {
    /// List custom events
    List {
        /// Only events with exactly this title
        #[arg(short, long, value_name = "TEXT")]
        title: Option<String>,
    },

    /// Add a custom event
    Add {
        #[arg(short, long, value_name = "TEXT")]
        title: String,

        /// Start, as YYYY-MM-DDTHH:MM (UTC) or RFC 3339
        #[arg(long, value_name = "DATE")]
        start: String,

        /// End, same formats as --start
        #[arg(long, value_name = "DATE")]
        end: String,

        #[arg(short, long, value_name = "TEXT")]
        description: Option<String>,

        /// Repeat for several locations
        #[arg(short, long = "location", value_name = "ROOM")]
        locations: Vec<String>,

        /// Repeat for several stakeholders
        #[arg(short, long = "stakeholder", value_name = "NAME")]
        stakeholders: Vec<String>,
    },

    /// Move custom events to the archive collection
    #[command(group(clap::ArgGroup::new("selector").required(true).args(["id", "title"])))]
    Remove {
        #[arg(long, value_name = "ID")]
        id: Option<String>,

        #[arg(long, value_name = "TEXT")]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Inspect { ref source }) => {
            let summary = inspect(source).await?;
            println!("{}", summary);
            Ok(())
        }
        Some(Commands::Custom { ref action }) => {
            let params = load_params(&cli)?;
            let store = MongoStore::connect(&params.database.uri(), &params.database.name)
                .await
                .context("Failed to connect to the database")?;
            handle_custom(&store, action).await
        }
        Some(Commands::Run(ref args)) => run(&cli, args).await,
        None => run(&cli, &RunArgs::default()).await,
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "planning_updater=info",
        1 => "planning_updater=debug",
        _ => "planning_updater=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_params(cli: &Cli) -> Result<Params> {
    tracing::info!("Starting to parse the {} file", cli.params.display());
    let params = Params::load(&cli.params)
        .context("Please check the parameters before launching the updater again")?
        .with_database_overrides(cli.db_host.clone(), cli.db_port);

    tracing::info!("The parameters were successfully set");
    match params.updater.frequency {
        Some(frequency) => tracing::info!("The updater frequency is set to {} seconds", frequency),
        None => tracing::info!("The updater will run once"),
    }
    tracing::info!(
        "The database is {} on {}:{}",
        params.database.name,
        params.database.host(),
        params.database.port()
    );
    Ok(params)
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let params = load_params(cli)?;
    let downloader = CalendarDownloader::new()?;

    if args.dry_run {
        let updater = Updater::new(MemoryStore::new(), downloader, &params);
        updater.run_pass(Utc::now()).await?;

        for branch in &params.branches {
            let events = updater.store().events(&live_collection(&branch.name));
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        return Ok(());
    }

    let store = MongoStore::connect(&params.database.uri(), &params.database.name)
        .await
        .context("Failed to connect to the database")?;
    for branch in &params.branches {
        store.ensure_indexes(&live_collection(&branch.name)).await?;
    }

    let scheduler = if args.once {
        Scheduler::once()
    } else {
        Scheduler::from_params(&params.updater)
    };
    let updater = Updater::new(store, downloader, &params);

    tracing::info!("Updater running. Press Ctrl+C to stop after the current pass.");
    scheduler.run(&updater).await?;
    tracing::info!("Updater stopped");
    Ok(())
}

async fn handle_custom(store: &MongoStore, action: &CustomAction) -> Result<()> {
    match action {
        CustomAction::List { title } => {
            let events = store.list_custom(title.as_deref()).await?;
            if events.is_empty() {
                println!("No custom events found.");
            }
            for event in &events {
                println!("{}", custom::describe(event));
            }
        }
        CustomAction::Add {
            title,
            start,
            end,
            description,
            locations,
            stakeholders,
        } => {
            let mut event = CustomEvent::new(
                title.clone(),
                custom::parse_datetime(start)?,
                custom::parse_datetime(end)?,
            );
            event.description = description.clone().unwrap_or_default();
            event.locations = locations.clone();
            event.stakeholders = stakeholders.clone();

            let event = custom::add(store, event).await?;
            println!("Created custom event: [{}] {}", event.event_id, event.title);
        }
        CustomAction::Remove { id, title } => {
            let selector = match (id, title) {
                (Some(id), _) => CustomSelector::Id(id.clone()),
                (None, Some(title)) => CustomSelector::Title(title.clone()),
                (None, None) => anyhow::bail!("Remove needs a title or an id"),
            };
            let removed = custom::remove(store, &selector).await?;
            println!("Removed {} custom events", removed);
        }
    }
    Ok(())
}
