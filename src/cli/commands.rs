//! CLI command definitions for prediction-feedback.
//!
//! Runs the monitor workers and exposes one-shot commands for registering
//! jobs, re-driving a monitor, processing a result payload by hand, and
//! inspecting the label schema.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::FeedbackConfig;
use crate::dispatch::QueueDispatcher;
use crate::labels::{question_answers_schema, GalaxyZooLabels, DEFAULT_DATA_RELEASE_SUFFIX};
use crate::monitor::{
    HttpBatchAdvancer, JobCompletionMonitor, NewPredictionJob, PredictionJobStatus,
};
use crate::results::{ExplorationSampler, PredictionResultsProcessor};
use crate::scheduler::{JobQueue, QueuedJob, WorkerPool, WorkerPoolConfig};
use crate::storage::SqliteJobStore;

/// Active learning feedback loop for batch prediction jobs.
#[derive(Parser)]
#[command(name = "prediction-feedback")]
#[command(about = "Monitor batch prediction jobs and feed their results back to active subject sets")]
#[command(version)]
#[command(
    long_about = "prediction-feedback polls external batch prediction jobs until they finish, then \
partitions the predicted subjects by confidence, samples uncertain ones for exploration, and \
enqueues both selections for an active subject set.\n\nExample usage:\n  prediction-feedback create-job \
--service-job-url https://batch.example/jobs/17 --subject-set-id 4242\n  prediction-feedback worker"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis URL (overrides REDIS_URL).
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Job store URL (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the monitor worker pool until interrupted.
    Worker(WorkerArgs),

    /// Register a prediction job and start monitoring it.
    CreateJob(CreateJobArgs),

    /// Enqueue a monitor invocation for an existing job, or run one poll inline.
    Monitor(MonitorArgs),

    /// Process a result payload into an active subject set.
    Process(ProcessArgs),

    /// List prediction jobs by status.
    Jobs(JobsArgs),

    /// Show monitor and active set queue statistics.
    QueueStats,

    /// Print the flat question/answer label schema.
    LabelSchema,

    /// Rename answer-index keys in a JSON object to label column names.
    ExtractLabels(ExtractLabelsArgs),
}

/// Arguments for `prediction-feedback worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent monitor workers (overrides NUM_WORKERS).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum seconds a single poll cycle may take.
    #[arg(long, default_value = "600")]
    pub job_timeout: u64,

    /// Bearer token for the batch system status API.
    #[arg(long, env = "BATCH_API_TOKEN")]
    pub batch_token: Option<String>,
}

/// Arguments for `prediction-feedback create-job`.
#[derive(Parser, Debug)]
pub struct CreateJobArgs {
    /// Status URL of the job in the batch prediction system.
    #[arg(long)]
    pub service_job_url: String,

    /// Active subject set receiving the selected subjects.
    #[arg(long)]
    pub subject_set_id: String,
}

/// Arguments for `prediction-feedback monitor`.
#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Prediction job id.
    pub job_id: i64,

    /// Run a single poll cycle in this process instead of enqueueing one.
    #[arg(long)]
    pub inline: bool,

    /// Bearer token for the batch system status API.
    #[arg(long, env = "BATCH_API_TOKEN")]
    pub batch_token: Option<String>,
}

/// Arguments for `prediction-feedback process`.
#[derive(Parser, Debug)]
pub struct ProcessArgs {
    /// Location of the result payload (http(s) URL, file URL, or local path).
    #[arg(long)]
    pub results_url: String,

    /// Active subject set receiving the selected subjects.
    #[arg(long)]
    pub subject_set_id: String,

    /// Seed for the exploration sample.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for the temporary payload copy.
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

/// Arguments for `prediction-feedback jobs`.
#[derive(Parser, Debug)]
pub struct JobsArgs {
    /// Status to list (pending, running, completed, failed).
    #[arg(short, long, default_value = "pending")]
    pub status: String,
}

/// Arguments for `prediction-feedback extract-labels`.
#[derive(Parser, Debug)]
pub struct ExtractLabelsArgs {
    /// Workflow task key (e.g. T0).
    #[arg(short, long)]
    pub task_key: String,

    /// Data release suffix for column names.
    #[arg(long, default_value = DEFAULT_DATA_RELEASE_SUFFIX)]
    pub suffix: String,

    /// JSON file holding an object keyed by answer index.
    pub input: PathBuf,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::CreateJob(args) => run_create_job_command(config, args).await,
        Commands::Monitor(args) => run_monitor_command(config, args).await,
        Commands::Process(args) => run_process_command(config, args).await,
        Commands::Jobs(args) => run_jobs_command(config, args).await,
        Commands::QueueStats => run_queue_stats_command(config).await,
        Commands::LabelSchema => print_json(&question_answers_schema()),
        Commands::ExtractLabels(args) => run_extract_labels_command(args).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FeedbackConfig> {
    let mut config = FeedbackConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url.clone());
    }
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Connections shared by the commands that run or feed the monitor.
struct Runtime {
    store: Arc<SqliteJobStore>,
    monitor_queue: Arc<JobQueue>,
    active_set_queue: Arc<JobQueue>,
}

impl Runtime {
    async fn connect(config: &FeedbackConfig) -> anyhow::Result<Self> {
        let store = SqliteJobStore::open(&config.database_url)
            .await
            .with_context(|| format!("Failed to open job store {}", config.database_url))?;
        let monitor_queue = JobQueue::connect(&config.redis_url, &config.monitor_queue_name)
            .await
            .context("Failed to connect monitor queue")?
            .with_max_attempts(config.max_attempts);
        let active_set_queue = JobQueue::connect(&config.redis_url, &config.active_set_queue_name)
            .await
            .context("Failed to connect active set queue")?;

        Ok(Self {
            store: Arc::new(store),
            monitor_queue: Arc::new(monitor_queue),
            active_set_queue: Arc::new(active_set_queue),
        })
    }

    fn processor(&self, config: &FeedbackConfig) -> PredictionResultsProcessor {
        let dispatcher = Arc::new(QueueDispatcher::new(Arc::clone(&self.active_set_queue)));
        PredictionResultsProcessor::new(dispatcher, config)
    }

    fn monitor(&self, config: &FeedbackConfig, batch_token: Option<String>) -> JobCompletionMonitor {
        JobCompletionMonitor::new(
            self.store.clone(),
            Arc::new(HttpBatchAdvancer::new(batch_token)),
            self.monitor_queue.clone(),
            Arc::new(self.processor(config)),
            config.monitor_reschedule_delay,
        )
    }
}

async fn run_worker_command(mut config: FeedbackConfig, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config = config.with_num_workers(workers);
        config.validate().context("Invalid configuration")?;
    }

    let runtime = Runtime::connect(&config).await?;
    let monitor = Arc::new(runtime.monitor(&config, args.batch_token));
    let pool_config = WorkerPoolConfig::from_feedback(&config)
        .with_job_timeout(Duration::from_secs(args.job_timeout));

    let mut pool = WorkerPool::with_queue(pool_config, Arc::clone(&runtime.monitor_queue), monitor);
    pool.start().await?;

    info!(
        workers = pool.num_workers(),
        probability_threshold = config.probability_threshold,
        randomisation_factor = config.randomisation_factor,
        reschedule_delay_secs = config.monitor_reschedule_delay.as_secs(),
        "Monitor workers running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    pool.shutdown().await?;
    let stats = pool.stats();
    info!(
        running = pool.is_running(),
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        skipped = stats.jobs_skipped,
        "Worker pool stopped"
    );
    Ok(())
}

async fn run_create_job_command(config: FeedbackConfig, args: CreateJobArgs) -> anyhow::Result<()> {
    let runtime = Runtime::connect(&config).await?;

    let job = runtime
        .store
        .create(NewPredictionJob::new(args.service_job_url, args.subject_set_id))
        .await?;
    runtime
        .monitor_queue
        .enqueue(QueuedJob::monitor(job.id).with_max_attempts(config.max_attempts))
        .await?;

    info!(prediction_job_id = job.id, "Prediction job registered and monitor enqueued");
    print_json(&job)
}

async fn run_monitor_command(config: FeedbackConfig, args: MonitorArgs) -> anyhow::Result<()> {
    let runtime = Runtime::connect(&config).await?;

    if !args.inline {
        runtime
            .monitor_queue
            .enqueue(QueuedJob::monitor(args.job_id).with_max_attempts(config.max_attempts))
            .await?;
        info!(prediction_job_id = args.job_id, "Monitor invocation enqueued");
        return Ok(());
    }

    let monitor = runtime.monitor(&config, args.batch_token);
    let outcome = monitor
        .poll(args.job_id)
        .await
        .with_context(|| format!("Poll of prediction job {} failed", args.job_id))?;

    info!(
        prediction_job_id = args.job_id,
        outcome = outcome.label(),
        "Poll cycle finished"
    );
    print_json(outcome.job())
}

async fn run_process_command(config: FeedbackConfig, args: ProcessArgs) -> anyhow::Result<()> {
    let active_set_queue = JobQueue::connect(&config.redis_url, &config.active_set_queue_name)
        .await
        .context("Failed to connect active set queue")?;
    let dispatcher = Arc::new(QueueDispatcher::new(Arc::new(active_set_queue)));

    let mut processor = PredictionResultsProcessor::new(dispatcher, &config);
    if let Some(seed) = args.seed {
        processor = processor.with_sampler(ExplorationSampler::new().with_seed(seed));
    }
    if let Some(dir) = args.scratch_dir {
        processor = processor.with_fetcher(crate::results::ResultFetcher::new().with_scratch_dir(dir));
    }

    let summary = processor
        .run(&args.results_url, &args.subject_set_id)
        .await
        .with_context(|| format!("Failed to process {}", args.results_url))?;
    print_json(&summary)
}

async fn run_jobs_command(config: FeedbackConfig, args: JobsArgs) -> anyhow::Result<()> {
    let status: PredictionJobStatus = args
        .status
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let store = SqliteJobStore::open(&config.database_url).await?;
    let jobs = store.list_by_status(status).await?;
    print_json(&jobs)
}

async fn run_queue_stats_command(config: FeedbackConfig) -> anyhow::Result<()> {
    let mut stats = Vec::new();
    for name in [&config.monitor_queue_name, &config.active_set_queue_name] {
        let queue = JobQueue::connect(&config.redis_url, name)
            .await
            .with_context(|| format!("Failed to connect queue {name}"))?;
        stats.push(queue.stats().await?);
    }
    print_json(&stats)
}

async fn run_extract_labels_command(args: ExtractLabelsArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let data: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a JSON object", args.input.display()))?;

    let labels = GalaxyZooLabels::new(&args.task_key, &args.suffix)?;
    print_json(&labels.extract(&data)?)
}
