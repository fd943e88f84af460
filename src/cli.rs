use crate::campaign;
use crate::config::{self, EngineConfig};
use crate::db::store::Store;
use crate::dispatch::delay::{DELAY_SETTINGS_KEY, DelaySettings};
use crate::dispatch::filters::{FILTER_SETTINGS_KEY, FilterSettings};
use crate::dispatch::pool::IdentityPool;
use crate::dispatch::worker::{self, WorkerInput};
use crate::drip;
use crate::events::stream::TaskQueue;
use crate::scheduler::{self, SchedulerInput};
use crate::transport::provider_for;
use crate::warmup::NoopWarmup;
use anyhow::Result;
use chrono::Utc;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "herald", version)]
#[command(
    about = "Event-driven dispatch engine for outbound message campaigns",
    long_about = "herald fans campaigns out into a durable task queue, drains it through rate-limit-aware dispatch workers, advances multi-step drip sequences, and runs the periodic scheduler that ties campaign lifecycle transitions together."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  herald start campaign.toml
  herald worker --consumer worker-1
  herald scheduler
  herald status --campaign <CAMPAIGN_ID>
  herald completion zsh > ~/.zsh/completions/_herald
  herald man > herald.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Start a campaign from a TOML request file",
        long_about = "Start a campaign. Configuration errors (missing list, template, A/B test, accounts, or an empty rotation) are rejected before any task is queued. Without `scheduled_for`, one task per recipient is appended before the command returns; with it, the campaign waits for the scheduler."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Example request file:
  name = \"spring-outreach\"
  list_id = \"<LIST_ID>\"
  template_id = \"<TEMPLATE_ID>\"
  account_ids = [\"<ACCOUNT_ID>\"]
  delay = 1.5
  # scheduled_for = \"2026-08-07T09:00:00Z\"")]
    Start {
        #[arg(value_name = "REQUEST_FILE", help = "Path to TOML campaign request")]
        request_file: PathBuf,
        #[arg(
            long,
            value_name = "PATH",
            help = "Path to state DB (default: $XDG_STATE_HOME/herald/state.db)"
        )]
        state_db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON event log to file")]
        log: Option<PathBuf>,
    },
    #[command(about = "Stop a campaign")]
    #[command(arg_required_else_help = true)]
    Stop {
        #[arg(long, value_name = "CAMPAIGN_ID", help = "Campaign to stop")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Print a campaign's current status")]
    #[command(arg_required_else_help = true)]
    Status {
        #[arg(long, value_name = "CAMPAIGN_ID", help = "Campaign to query")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Delete a campaign and its outcome rows")]
    #[command(arg_required_else_help = true)]
    Delete {
        #[arg(long, value_name = "CAMPAIGN_ID", help = "Campaign to delete")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Inspect a campaign: config summary and outcome counts")]
    #[command(arg_required_else_help = true)]
    Inspect {
        #[arg(long, value_name = "CAMPAIGN_ID", help = "Campaign to inspect")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(
        about = "Run a dispatch worker",
        long_about = "Run one dispatch worker: pulls tasks from the queue's consumer group, executes the send pipeline, persists an outcome per task, acknowledges only after the outcome is committed, and pauses per the delay policy. Multiple workers with distinct consumer names compete on the same group."
    )]
    Worker {
        #[arg(
            long,
            default_value = "worker-1",
            value_name = "NAME",
            help = "Consumer name within the group"
        )]
        consumer: String,
        #[arg(long, value_name = "GROUP", help = "Consumer group override")]
        group: Option<String>,
        #[arg(
            long,
            default_value = "sim",
            value_name = "TRANSPORT",
            value_parser = ["sim"],
            help = "Messaging transport to use"
        )]
        transport: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON event log to file")]
        log: Option<PathBuf>,
    },
    #[command(
        about = "Run the scheduler loop",
        long_about = "Run the periodic orchestrator: activates due scheduled campaigns, detects completed campaigns, advances due drip sequences, and invokes the warm-up cycle. Run exactly one instance; a second scheduler risks duplicate activations and drip sends."
    )]
    Scheduler {
        #[arg(
            long,
            default_value = "sim",
            value_name = "TRANSPORT",
            value_parser = ["sim"],
            help = "Messaging transport for drip sends"
        )]
        transport: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
        #[arg(long, value_name = "PATH", help = "Write NDJSON event log to file")]
        log: Option<PathBuf>,
    },
    #[command(about = "Activate a drip campaign and enroll its list")]
    #[command(arg_required_else_help = true)]
    DripStart {
        #[arg(long, value_name = "DRIP_ID", help = "Drip campaign to activate")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Pause a drip campaign")]
    #[command(arg_required_else_help = true)]
    DripPause {
        #[arg(long, value_name = "DRIP_ID", help = "Drip campaign to pause")]
        campaign: String,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(
        about = "Write the shared delay settings document",
        long_about = "Write the shared delay settings document consumed by every worker. `fixed` keeps each task's own delay; `random` draws uniformly between --min and --max seconds after every outcome."
    )]
    SetDelay {
        #[arg(
            long,
            default_value = "fixed",
            value_name = "MODE",
            value_parser = ["fixed", "random"],
            help = "Delay mode"
        )]
        mode: String,
        #[arg(long, default_value_t = 1.0, value_name = "SECS", help = "Fixed delay value")]
        value: f64,
        #[arg(long, default_value_t = 1.0, value_name = "SECS", help = "Random lower bound")]
        min: f64,
        #[arg(long, default_value_t = 5.0, value_name = "SECS", help = "Random upper bound")]
        max: f64,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(about = "Write the shared recipient filter document")]
    SetFilters {
        #[arg(
            long,
            default_value_t = true,
            action = ArgAction::Set,
            value_name = "BOOL",
            help = "Skip recipients that resolve as bots"
        )]
        skip_bots: bool,
        #[arg(
            long,
            default_value_t = false,
            action = ArgAction::Set,
            value_name = "BOOL",
            help = "Skip recipients without a profile photo"
        )]
        skip_no_photo: bool,
        #[arg(long, value_name = "PATH", help = "Path to state DB")]
        state_db: Option<PathBuf>,
    },
    #[command(
        about = "Generate shell completion script",
        long_about = "Generate shell completion script for your shell. Redirect output to your shell completion directory."
    )]
    #[command(arg_required_else_help = true)]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(
        about = "Generate a man page",
        long_about = "Generate a roff man page for herald."
    )]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let engine = config::load_engine_config(Path::new("."))?;

    match cli.command {
        Commands::Start {
            request_file,
            state_db,
            log,
        } => {
            let db = resolve_state_db(state_db);
            let store = Store::open(&db)?;
            let queue = open_queue(&db, &engine)?;
            let mut rng = StdRng::from_entropy();
            let request = campaign::load_request(&request_file)?;
            let outcome =
                campaign::start_campaign(&store, &queue, &mut rng, &request, log.as_deref())?;
            println!(
                "status: {} campaign_id: {}",
                outcome.status, outcome.campaign_id
            );
            Ok(())
        }
        Commands::Stop { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            campaign::stop_campaign(&store, &campaign)?;
            println!("status: stopped campaign_id: {campaign}");
            Ok(())
        }
        Commands::Status { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            let row = store
                .get_campaign(&campaign)?
                .ok_or_else(|| anyhow::anyhow!("campaign not found: {campaign}"))?;
            println!("campaign_id: {} status: {} name: {}", row.id, row.status, row.name);
            Ok(())
        }
        Commands::Delete { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            campaign::delete_campaign(&store, &campaign)?;
            println!("status: deleted campaign_id: {campaign}");
            Ok(())
        }
        Commands::Inspect { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            campaign::inspect_campaign(&store, &campaign)
        }
        Commands::Worker {
            consumer,
            group,
            transport,
            state_db,
            log,
        } => {
            let db = resolve_state_db(state_db);
            let store = Store::open(&db)?;
            let queue = open_queue(&db, &engine)?;
            let mut pool = IdentityPool::new(provider_for(&transport)?);
            let mut rng = StdRng::from_entropy();
            let input = WorkerInput {
                group: group.unwrap_or_else(|| engine.queue.group.clone()),
                consumer_id: consumer,
                block_timeout: Duration::from_millis(engine.queue.block_ms),
                ndjson_log: log,
            };
            worker::run_worker_loop(&store, &queue, &mut pool, &mut rng, &input)
        }
        Commands::Scheduler {
            transport,
            state_db,
            log,
        } => {
            let db = resolve_state_db(state_db);
            let store = Store::open(&db)?;
            let queue = open_queue(&db, &engine)?;
            let mut pool = IdentityPool::new(provider_for(&transport)?);
            let mut rng = StdRng::from_entropy();
            let mut warmup = NoopWarmup;
            let input = SchedulerInput {
                tick: Duration::from_secs(engine.scheduler.tick_secs),
                drip_batch: engine.scheduler.drip_batch,
                ndjson_log: log,
            };
            scheduler::run_scheduler_loop(
                &store,
                &queue,
                &mut pool,
                &mut rng,
                &mut warmup,
                &input,
            )
        }
        Commands::DripStart { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            let enrolled = drip::start_drip_campaign(&store, &campaign, Utc::now())?;
            println!("status: started enrolled: {enrolled}");
            Ok(())
        }
        Commands::DripPause { campaign, state_db } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            drip::pause_drip_campaign(&store, &campaign)?;
            println!("status: paused drip_id: {campaign}");
            Ok(())
        }
        Commands::SetDelay {
            mode,
            value,
            min,
            max,
            state_db,
        } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            let settings = DelaySettings {
                mode,
                value,
                min_delay: min,
                max_delay: max,
            };
            store.set_setting(DELAY_SETTINGS_KEY, &serde_json::to_value(&settings)?)?;
            println!("status: updated");
            Ok(())
        }
        Commands::SetFilters {
            skip_bots,
            skip_no_photo,
            state_db,
        } => {
            let store = Store::open(&resolve_state_db(state_db))?;
            let settings = FilterSettings {
                skip_bots,
                skip_no_photo,
            };
            store.set_setting(FILTER_SETTINGS_KEY, &serde_json::to_value(&settings)?)?;
            println!("status: updated");
            Ok(())
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Man { output } => {
            let man = clap_mangen::Man::new(Cli::command());
            match output {
                Some(path) => {
                    let mut bytes = Vec::new();
                    man.render(&mut bytes)?;
                    fs::write(path, bytes)?;
                }
                None => {
                    man.render(&mut io::stdout())?;
                }
            }
            Ok(())
        }
    }
}

fn resolve_state_db(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(config::default_state_db)
}

fn open_queue(db: &Path, engine: &EngineConfig) -> Result<TaskQueue> {
    TaskQueue::open_with_requeue(db, Duration::from_secs(engine.queue.requeue_secs))
}
