use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Resolve, batch and review tasks tracked in a shared progress index")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .conductor directory, a default config and an empty progress index
    Init,
    /// Register (or refresh) a plan file in the progress index
    Register {
        /// Plan id; read from <plans_dir>/<id>.md or <plans_dir>/<id>/plan.md
        plan_id: String,

        /// Phase the plan belongs to
        #[arg(long)]
        phase: u32,

        /// Upstream phases (comma-separated); defaults to every lower phase
        #[arg(long, value_delimiter = ',')]
        depends_on: Option<Vec<u32>>,
    },
    /// Show phases, plans and task counts
    Status,
    /// List the tasks that could start right now
    Eligible,
    /// Show how the eligible tasks would be batched
    Batches {
        /// Maximum tasks per batch
        #[arg(long)]
        max_batch_size: Option<usize>,
    },
    /// Run eligible tasks until nothing is left or the step budget is spent
    Run {
        /// Maximum batches to dispatch
        #[arg(long)]
        max_steps: Option<u32>,

        /// Maximum concurrent review cycles
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("conductor=debug")
        } else {
            EnvFilter::new("conductor=warn")
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir, cli.verbose)?,
        Commands::Register {
            plan_id,
            phase,
            depends_on,
        } => cmd::cmd_register(&project_dir, &cli, plan_id, *phase, depends_on.clone())?,
        Commands::Status => cmd::cmd_status(&project_dir, &cli)?,
        Commands::Eligible => cmd::cmd_eligible(&project_dir, &cli)?,
        Commands::Batches { max_batch_size } => {
            cmd::cmd_batches(&project_dir, &cli, *max_batch_size)?
        }
        Commands::Run {
            max_steps,
            max_parallel,
            json,
        } => cmd::cmd_run(&project_dir, &cli, *max_steps, *max_parallel, *json).await?,
    }

    Ok(())
}
