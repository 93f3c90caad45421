use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use bencher::bencher::{Overview, Phase, Removed};
use bencher::config::BencherConfig;
use bencher::lock::LockStatus;
use bencher::runner::names::random_name;
use bencher::scheduler::{Job, Scheduled};
use bencher::shutdown::install_shutdown_handler;
use bencher::{Bencher, JobRequest};

#[derive(Parser, Debug)]
#[command(name = "bencher")]
#[command(version)]
#[command(about = "Queue benchmark runs so only one executes at a time on this host")]
#[command(propagate_version = true)]
struct Args {
    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create a job and schedule it
    Run(RunArgs),

    /// Schedule an already created job (run by the coordinator container)
    Sched {
        /// The job name
        version: String,
    },

    /// Print one job's detail, or list every job
    #[command(alias = "ls")]
    Get {
        /// The job name; omit to list all jobs
        version: Option<String>,
    },

    /// Remove jobs, their queue entries and their containers
    Rm {
        /// Remove every job
        #[arg(long, conflicts_with = "versions")]
        all: bool,

        /// Also stop the job that is currently running
        #[arg(short, long)]
        force: bool,

        /// The job names
        #[arg(required_unless_present = "all")]
        versions: Vec<String>,
    },

    /// Show who holds the execution lock
    Lock,

    /// Clear the execution lock left behind by a crashed run
    Unlock,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job name; a random one is drawn when omitted
    #[arg(long)]
    name: Option<String>,

    /// Directory mounted into the sandbox (default: the job's versions dir)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Directory inside the workspace to run the command in
    #[arg(long)]
    workdir: Option<String>,

    /// Sandbox image override
    #[arg(long)]
    image: Option<String>,

    /// Hand scheduling to a detached coordinator container and return
    #[arg(short, long)]
    detach: bool,

    /// Command to run in the sandbox (default: go test -bench=. -benchmem)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    version: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    coordinator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<Job>,
}

#[derive(Serialize)]
struct JobListItem {
    version: String,
    status: String,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(
    bencher: &Bencher,
    args: RunArgs,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = match args.name {
        Some(name) => name,
        None => {
            let name = random_name();
            eprintln!("Job name not given, using `{}`. Pass --name to choose one.", name);
            name
        }
    };
    let workspace = match args.workspace {
        Some(path) => path,
        None => {
            let path = bencher.config().version_dir(&version);
            tokio::fs::create_dir_all(&path).await?;
            path
        }
    };

    let mut request = JobRequest::new(&version, workspace).with_command(args.command);
    if let Some(workdir) = args.workdir {
        request = request.with_workdir(workdir);
    }

    let result = if args.detach {
        bencher.prepare(&request).await?;
        let coordinator = bencher.dispatch(&version).await?;
        RunOutput {
            version,
            outcome: "dispatched",
            coordinator: Some(coordinator),
            job: None,
        }
    } else {
        match bencher.submit(&request).await? {
            Scheduled::Ran(job) => RunOutput {
                version,
                outcome: "ran",
                coordinator: None,
                job: Some(job),
            },
            Scheduled::Queued => RunOutput {
                version,
                outcome: "queued",
                coordinator: None,
                job: None,
            },
        }
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => match (&result.job, &result.coordinator) {
            (Some(job), _) => print_job_detail(job),
            (None, Some(coordinator)) => {
                println!("Job {} handed to coordinator {}", result.version, coordinator)
            }
            (None, None) => println!("Job {} queued", result.version),
        },
    }
    Ok(())
}

async fn handle_sched(
    bencher: &Bencher,
    version: String,
) -> Result<(), Box<dyn std::error::Error>> {
    match bencher.schedule(&version).await? {
        Scheduled::Ran(job) => {
            tracing::info!(version = %job.version, status = %job.status(), "Scheduling finished")
        }
        Scheduled::Queued => tracing::info!(version = %version, "Job queued"),
    }
    Ok(())
}

async fn handle_get(
    bencher: &Bencher,
    version: Option<String>,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match version {
        Some(version) => {
            let job = bencher.query(&version).await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
                OutputFormat::Table => {
                    let overview = bencher.query_all().await?;
                    let phase = overview
                        .phase(&version)
                        .unwrap_or(Phase::Settled(job.status()));
                    println!("Name:      {}", job.version);
                    println!("Status:    {}", phase);
                    print_job_body(&job);
                }
            }
        }
        None => {
            let overview = bencher.query_all().await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&overview)?),
                OutputFormat::Table => print_overview(&overview),
            }
        }
    }
    Ok(())
}

async fn handle_rm(
    bencher: &Bencher,
    all: bool,
    force: bool,
    versions: Vec<String>,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = if all {
        bencher.remove_all(force).await?
    } else {
        bencher.remove(&versions, force).await?
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&removed)?),
        OutputFormat::Table => print_removed(&removed),
    }
    if !removed.failed.is_empty() {
        return Err(format!("could not remove containers: {}", removed.failed.join(", ")).into());
    }
    Ok(())
}

async fn handle_lock(
    bencher: &Bencher,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = bencher.lock_status().await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => match status {
            LockStatus::Free => println!("Lock is free"),
            LockStatus::Held { running: Some(v) } => println!("Lock held, running {}", v),
            LockStatus::Held { running: None } => println!("Lock held, no job recorded yet"),
        },
    }
    Ok(())
}

// =============================================================================
// Table Output
// =============================================================================

fn print_job_body(job: &Job) {
    if let Some(exit_code) = job.exit_code {
        println!("Exit Code: {}", exit_code);
    }
    if let Some(reason) = &job.stuck {
        println!("Stuck:     {}", reason);
    }
    if !job.stdout.is_empty() {
        println!("Output:");
        for line in job.stdout.lines() {
            println!("  {}", line);
        }
    }
    if !job.stderr.is_empty() {
        println!("Error:");
        for line in job.stderr.lines() {
            println!("  {}", line);
        }
    }
}

fn print_job_detail(job: &Job) {
    println!("Name:      {}", job.version);
    println!("Status:    {}", job.status());
    print_job_body(job);
}

fn print_overview(overview: &Overview) {
    let mut rows: Vec<JobListItem> = overview
        .jobs
        .iter()
        .filter(|j| overview.phase(&j.version) == Some(Phase::Settled(j.status())))
        .map(|j| JobListItem {
            version: j.version.clone(),
            status: j.status().to_string(),
        })
        .collect();
    if let Some(running) = &overview.running {
        rows.push(JobListItem {
            version: running.clone(),
            status: Phase::Running.to_string(),
        });
    }
    for (order, queued) in overview.queue.iter().enumerate() {
        rows.push(JobListItem {
            version: queued.clone(),
            status: Phase::Queued(order).to_string(),
        });
    }

    if rows.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!("{:<32} STATUS", "NAME");
    println!("{}", "-".repeat(60));
    for row in rows {
        println!("{:<32} {}", row.version, row.status);
    }
}

fn print_removed(removed: &Removed) {
    if removed.deleted.is_empty()
        && removed.dequeued.is_empty()
        && removed.stopped.is_none()
        && removed.failed.is_empty()
    {
        println!("Nothing removed.");
        return;
    }
    for version in &removed.deleted {
        println!("Deleted {}", version);
    }
    for version in removed
        .dequeued
        .iter()
        .filter(|v| !removed.deleted.contains(v))
    {
        println!("Dequeued {}", version);
    }
    if let Some(version) = &removed.stopped {
        println!("Stopped {}", version);
    }
    for version in &removed.failed {
        println!("Container of {} left in place", version);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BencherConfig::from_env();
    if let Commands::Run(RunArgs {
        image: Some(image), ..
    }) = &args.command
    {
        config = config.with_image(image.clone());
    }

    let shutdown = install_shutdown_handler()?;
    let bencher = Bencher::open(config).await?.with_shutdown(shutdown);

    match args.command {
        Commands::Run(run_args) => handle_run(&bencher, run_args, &args.output).await?,
        Commands::Sched { version } => handle_sched(&bencher, version).await?,
        Commands::Get { version } => handle_get(&bencher, version, &args.output).await?,
        Commands::Rm {
            all,
            force,
            versions,
        } => handle_rm(&bencher, all, force, versions, &args.output).await?,
        Commands::Lock => handle_lock(&bencher, &args.output).await?,
        Commands::Unlock => {
            bencher.unlock().await?;
            println!("Lock cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
