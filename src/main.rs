use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(version, about = "Recursive task decomposition across a tree of agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a config file (defaults to ./arbor.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Environment root agents work in
    #[arg(long, global = true, default_value = "./sandbox")]
    pub env_dir: PathBuf,

    /// Snapshot file (defaults to <env-dir>/state/tree.json)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run with a root task
    Run {
        /// The task for the root agent
        task: String,

        /// Kind of the root agent
        #[arg(long, default_value = "thinking")]
        kind: String,

        /// Maximum concurrently executing agents. Overrides arbor.toml and ARBOR_MAX_CONCURRENT.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Continue an interrupted or failed run from its snapshot
    Resume {
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Show the tree stored in a snapshot
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    arbor::logging::init(cli.verbose);

    match &cli.command {
        Commands::Run {
            task,
            kind,
            max_concurrent,
        } => cmd::cmd_run(&cli, task, kind, *max_concurrent).await?,
        Commands::Resume { max_concurrent } => cmd::cmd_resume(&cli, *max_concurrent).await?,
        Commands::Status => cmd::cmd_status(&cli)?,
    }

    Ok(())
}
