use anyhow::Result;
use clap::{Parser, Subcommand};
use gitgym::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gitgym")]
#[command(about = "Sandbox session manager for practicing git", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gitgym server
    Serve,

    /// Inspect or remove sandbox containers
    #[command(subcommand)]
    Sandbox(SandboxCommands),
}

#[derive(Subcommand)]
enum SandboxCommands {
    /// List sandbox containers, running or stopped
    List,

    /// Force-remove a sandbox container
    Prune {
        /// Container name (the sandbox id)
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let path = Config::default_path();
            if path.exists() {
                Config::load(path)?
            } else {
                Config::default()
            }
        }
    };

    init_logging(&config.logging.level, &config.logging.format)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => gitgym::run(config).await?,
        Commands::Sandbox(command) => handle_sandbox_command(command).await?,
    }

    Ok(())
}

async fn handle_sandbox_command(command: SandboxCommands) -> Result<()> {
    let docker = gitgym::DockerClient::new().await?;

    match command {
        SandboxCommands::List => {
            for container in docker.list_sandbox_containers().await? {
                println!("{}\t{}", container.name, container.id);
            }
        }
        SandboxCommands::Prune { name } => {
            docker.remove_container(&name).await?;
            println!("removed {name}");
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
