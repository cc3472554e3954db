use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::{error, info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::error::FundPulseError;
use crate::extract::{CampaignRecord, StrategyKind};
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::schedule::{NewTask, ScheduledTask, TaskRun, TaskType, TaskUpdate, Trigger};
use crate::scheduler::Scheduler;
use crate::store::SnapshotStore;

#[derive(Parser)]
#[command(
    name = "fundpulse",
    version,
    about = "FundPulse: fundraising campaign tracker"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run scheduled tasks until Ctrl-C (default if no command specified)
    Serve,

    /// Extract one or more campaign pages
    Scrape {
        /// Campaign page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Render pages in a browser instead of parsing the static markup
        #[arg(long)]
        rendered: bool,

        /// Print results without recording them
        #[arg(long = "no-save")]
        no_save: bool,
    },

    /// Crawl seed pages for campaign URLs
    Discover {
        /// Seed page (repeatable; defaults to the configured seeds)
        #[arg(long = "seed")]
        seeds: Vec<String>,

        /// Stop after this many campaigns (defaults to the configured budget)
        #[arg(long)]
        max: Option<usize>,
    },

    /// Re-extract every active campaign in the store
    TrackAll {
        #[arg(long)]
        rendered: bool,
    },

    /// Manage scheduled tasks
    Tasks {
        #[command(subcommand)]
        action: TaskCommand,
    },

    /// Inspect tracked campaigns
    Campaigns {
        #[command(subcommand)]
        action: CampaignCommand,
    },

    /// Summary counts and total raised
    Stats,
}

#[derive(Subcommand)]
pub enum TaskCommand {
    List,

    Add {
        name: String,

        /// scrape, discover_and_scrape or track_all
        #[arg(long = "type", default_value = "scrape")]
        task_type: TaskType,

        /// hourly, daily, weekly, every_<n>_minutes, every_<n>_hours or a cron expression
        #[arg(long, default_value = "hourly")]
        schedule: String,

        #[arg(long = "url")]
        urls: Vec<String>,

        #[arg(long)]
        rendered: bool,

        /// Create the task disabled
        #[arg(long)]
        inactive: bool,
    },

    Update {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long = "type")]
        task_type: Option<TaskType>,

        #[arg(long)]
        schedule: Option<String>,

        /// Replaces the whole URL list
        #[arg(long = "url")]
        urls: Vec<String>,

        /// static or rendered
        #[arg(long)]
        strategy: Option<StrategyKind>,
    },

    Remove {
        id: i64,
    },

    Enable {
        id: i64,
    },

    Disable {
        id: i64,
    },

    /// Execute a task now, outside its schedule
    Run {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum CampaignCommand {
    List,

    /// Snapshot history and donations for one campaign, newest first
    History {
        /// Campaign id or URL
        campaign: String,

        #[arg(long, default_value_t = 10)]
        count: usize,
    },

    /// Resume tracking a campaign in track-all runs
    Enable {
        id: i64,
    },

    /// Stop tracking a campaign without deleting its history
    Disable {
        id: i64,
    },

    /// Delete a campaign with its snapshots and donations
    Remove {
        id: i64,
    },
}

impl Cli {
    pub fn handle_command_line(project_dirs: &ProjectDirs) -> Result<(), FundPulseError> {
        let args = Cli::parse();

        // Default to Serve if no command specified
        match args.command.unwrap_or(Command::Serve) {
            Command::Serve => Self::serve(project_dirs),
            Command::Scrape {
                urls,
                rendered,
                no_save,
            } => Self::scrape(project_dirs, &urls, strategy_kind(rendered), !no_save),
            Command::Discover { seeds, max } => Self::discover(project_dirs, seeds, max),
            Command::TrackAll { rendered } => Self::track_all(project_dirs, strategy_kind(rendered)),
            Command::Tasks { action } => Self::tasks(project_dirs, action),
            Command::Campaigns { action } => Self::campaigns(project_dirs, action),
            Command::Stats => Self::stats(project_dirs),
        }
    }

    fn open_pipeline(project_dirs: &ProjectDirs) -> Result<Pipeline, FundPulseError> {
        let config = Config::get()?;
        let db = Database::connect(&config.database.resolve_dir(project_dirs))?;
        Pipeline::from_config(config, db)
    }

    fn serve(project_dirs: &ProjectDirs) -> Result<(), FundPulseError> {
        let tick = Duration::from_secs(Config::get()?.scheduler.tick_secs);

        // The pipeline owns blocking HTTP clients, which must be created and
        // dropped outside the runtime.
        let pipeline = Arc::new(Self::open_pipeline(project_dirs)?);
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&pipeline)));
        let loaded = scheduler.load_tasks_from_db()?;
        info!("Loaded {} scheduled task(s)", loaded);

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| FundPulseError::Error(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(Arc::clone(&scheduler).run(tick, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C"),
                Err(e) => {
                    error!("Unable to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }));
        drop(rt);

        Ok(())
    }

    fn scrape(
        project_dirs: &ProjectDirs,
        urls: &[String],
        kind: StrategyKind,
        save: bool,
    ) -> Result<(), FundPulseError> {
        let pipeline = Self::open_pipeline(project_dirs)?;
        let interrupt = Arc::new(AtomicBool::new(false));
        let outcome = pipeline.extract_batch(urls, kind, save, &interrupt);
        print_outcome(&outcome);
        Ok(())
    }

    fn discover(
        project_dirs: &ProjectDirs,
        seeds: Vec<String>,
        max: Option<usize>,
    ) -> Result<(), FundPulseError> {
        let config = Config::get()?;
        let pipeline = Self::open_pipeline(project_dirs)?;
        let seeds = if seeds.is_empty() {
            pipeline.seeds().to_vec()
        } else {
            seeds
        };
        let max = max.unwrap_or(config.crawl.discover_max);

        let interrupt = Arc::new(AtomicBool::new(false));
        let report = pipeline.discover(&seeds, max, &interrupt);

        for url in report.sorted_urls() {
            println!("{}", url);
        }
        println!(
            "Found {} campaign(s) across {} page(s)",
            report.found.len(),
            report.visited
        );
        Ok(())
    }

    fn track_all(project_dirs: &ProjectDirs, kind: StrategyKind) -> Result<(), FundPulseError> {
        let pipeline = Self::open_pipeline(project_dirs)?;
        let interrupt = Arc::new(AtomicBool::new(false));
        let outcome = pipeline.track_all(kind, &interrupt)?;
        print_outcome(&outcome);
        Ok(())
    }

    fn tasks(project_dirs: &ProjectDirs, action: TaskCommand) -> Result<(), FundPulseError> {
        let scheduler = Scheduler::new(Arc::new(Self::open_pipeline(project_dirs)?));

        match action {
            TaskCommand::List => {
                let conn = scheduler.pipeline().store().database().conn()?;
                let tasks = ScheduledTask::list(&conn)?;
                if tasks.is_empty() {
                    println!("No scheduled tasks");
                }
                for task in &tasks {
                    print_task(task);
                    if let Some(run) = TaskRun::recent(&conn, task.task_id, 1)?.first() {
                        println!(
                            "      last run {}: {} ok, {} failed{}",
                            format_time(run.started_at),
                            run.succeeded,
                            run.failed,
                            run.error
                                .as_deref()
                                .map(|e| format!(" ({})", e))
                                .unwrap_or_default()
                        );
                    }
                }
            }
            TaskCommand::Add {
                name,
                task_type,
                schedule,
                urls,
                rendered,
                inactive,
            } => {
                if !Trigger::is_valid_spec(&schedule) {
                    warn!("Schedule '{}' is not recognized and will run hourly", schedule);
                    eprintln!("Warning: schedule '{}' is not recognized; the task will run hourly", schedule);
                }
                let task = scheduler.create_task(&NewTask {
                    name,
                    task_type,
                    schedule,
                    urls,
                    strategy: strategy_kind(rendered),
                    is_active: !inactive,
                })?;
                println!("Created task {}", task.task_id);
                print_task(&task);
            }
            TaskCommand::Update {
                id,
                name,
                task_type,
                schedule,
                urls,
                strategy,
            } => {
                if let Some(schedule) = schedule.as_deref().filter(|s| !Trigger::is_valid_spec(s)) {
                    eprintln!("Warning: schedule '{}' is not recognized; the task will run hourly", schedule);
                }
                let update = TaskUpdate {
                    name,
                    task_type,
                    schedule,
                    urls: (!urls.is_empty()).then_some(urls),
                    strategy,
                    is_active: None,
                };
                match scheduler.update_task(id, &update)? {
                    Some(task) => print_task(&task),
                    None => return Err(missing_task(id)),
                }
            }
            TaskCommand::Remove { id } => {
                if !scheduler.delete_task(id)? {
                    return Err(missing_task(id));
                }
                println!("Removed task {}", id);
            }
            TaskCommand::Enable { id } => Self::set_task_active(&scheduler, id, true)?,
            TaskCommand::Disable { id } => Self::set_task_active(&scheduler, id, false)?,
            TaskCommand::Run { id } => match scheduler.run_task_now(id)? {
                Some(outcome) => print_outcome(&outcome),
                None => println!("Task {} is missing or inactive", id),
            },
        }

        Ok(())
    }

    fn set_task_active(scheduler: &Scheduler, id: i64, active: bool) -> Result<(), FundPulseError> {
        match scheduler.set_task_active(id, active)? {
            Some(task) => {
                print_task(&task);
                Ok(())
            }
            None => Err(missing_task(id)),
        }
    }

    fn campaigns(project_dirs: &ProjectDirs, action: CampaignCommand) -> Result<(), FundPulseError> {
        let pipeline = Self::open_pipeline(project_dirs)?;
        let store = pipeline.store();

        match action {
            CampaignCommand::List => {
                for campaign in store.list_campaigns()? {
                    let latest = store.latest_snapshot(campaign.campaign_id)?;
                    println!(
                        "{:>5} {} {}{}",
                        campaign.campaign_id,
                        if campaign.is_active { " " } else { "x" },
                        campaign.title.as_deref().unwrap_or(&campaign.url),
                        latest
                            .map(|s| format!(" [{} raised at {}]", format_amount(s.amount_raised), format_time(s.scraped_at)))
                            .unwrap_or_default()
                    );
                }
            }
            CampaignCommand::History { campaign, count } => {
                let found = match campaign.parse::<i64>() {
                    Ok(id) => store.get_campaign(id)?,
                    Err(_) => store.get_campaign_by_url(&campaign)?,
                };
                let campaign = found
                    .ok_or_else(|| FundPulseError::Error(format!("No campaign matching '{}'", campaign)))?;
                let id = campaign.campaign_id;

                println!("{}", campaign.title.as_deref().unwrap_or(&campaign.url));
                println!("goal: {}", format_amount(campaign.goal_amount));
                for snapshot in store.snapshot_history(id, count)? {
                    println!(
                        "  {}  raised {}  donors {}  shares {}  ({})",
                        format_time(snapshot.scraped_at),
                        format_amount(snapshot.amount_raised),
                        format_count(snapshot.donor_count),
                        format_count(snapshot.share_count),
                        snapshot.strategy
                    );
                }

                let donations = store.donations_for(id)?;
                if let Some(latest_scrape) = donations.first().map(|d| d.scraped_at) {
                    println!("donations seen {}:", format_time(latest_scrape));
                    for donation in donations.iter().take_while(|d| d.scraped_at == latest_scrape) {
                        println!(
                            "    {} {}",
                            donation.amount_text.as_deref().unwrap_or("-"),
                            donation.donor_name.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
            CampaignCommand::Enable { id } => Self::set_campaign_active(store, id, true)?,
            CampaignCommand::Disable { id } => Self::set_campaign_active(store, id, false)?,
            CampaignCommand::Remove { id } => {
                if !store.remove_campaign(id)? {
                    return Err(FundPulseError::Error(format!("No campaign with id {}", id)));
                }
                println!("Removed campaign {}", id);
            }
        }

        Ok(())
    }

    fn set_campaign_active(store: &SnapshotStore, id: i64, active: bool) -> Result<(), FundPulseError> {
        if !store.set_campaign_active(id, active)? {
            return Err(FundPulseError::Error(format!("No campaign with id {}", id)));
        }
        println!("Campaign {} {}", id, if active { "enabled" } else { "disabled" });
        Ok(())
    }

    fn stats(project_dirs: &ProjectDirs) -> Result<(), FundPulseError> {
        let pipeline = Self::open_pipeline(project_dirs)?;
        let stats = pipeline.store().store_stats()?;

        println!("Campaigns:    {} ({} active)", stats.campaigns, stats.active_campaigns);
        println!("Snapshots:    {}", stats.snapshots);
        println!("Donations:    {}", stats.donations);
        println!("Total raised: {:.2}", stats.total_raised);
        Ok(())
    }
}

fn strategy_kind(rendered: bool) -> StrategyKind {
    if rendered {
        StrategyKind::Rendered
    } else {
        StrategyKind::Static
    }
}

fn missing_task(id: i64) -> FundPulseError {
    FundPulseError::Error(format!("No scheduled task with id {}", id))
}

fn format_time(ts: i64) -> String {
    Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_amount(amount: Option<f64>) -> String {
    amount.map(|a| format!("{:.2}", a)).unwrap_or_else(|| "-".to_string())
}

fn format_count(count: Option<i64>) -> String {
    count.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_task(task: &ScheduledTask) {
    let trigger = Trigger::from_spec(&task.schedule);
    let next = if task.is_active {
        trigger
            .next_after(chrono::Utc::now().timestamp())
            .map(format_time)
            .unwrap_or_else(|| "never".to_string())
    } else {
        "disabled".to_string()
    };

    println!(
        "{:>5} {} [{}] {} {} next: {}",
        task.task_id, task.name, task.task_type, trigger, task.strategy, next
    );
    for url in &task.urls {
        println!("      {}", url);
    }
}

fn print_record(record: &CampaignRecord) {
    println!("{}", record.title);
    println!("  {}", record.url);
    println!(
        "  raised {} of {}  donors {}  shares {}",
        record.amount_raised.raw,
        record.goal_amount.raw,
        format_count(record.donor_count),
        format_count(record.share_count)
    );
    if let Some(organizer) = &record.organizer {
        println!("  organizer: {}", organizer);
    }
    println!("  {}", record.short_description);
    for donation in &record.donations {
        println!("    {} {}", donation.amount, donation.name);
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    for record in &outcome.records {
        print_record(record);
    }
    for failure in &outcome.failures {
        println!("FAILED {}", failure);
    }
    for (url, err) in &outcome.persist_errors {
        println!("NOT SAVED {}: {}", url, err);
    }
    println!(
        "{} URL(s): {} succeeded, {} failed{}",
        outcome.url_count(),
        outcome.succeeded_count(),
        outcome.failed_count(),
        if outcome.interrupted { " (interrupted)" } else { "" }
    );
}
