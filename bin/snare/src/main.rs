mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "snare")]
#[command(about = "Hooked-browser command and control server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hook server (long-running daemon)
    Serve {
        /// Port to listen on (overrides config hook.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config hook.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage autorun rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Show configuration and store status
    Status,
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List stored rules
    List,
    /// Load a rule definition file into the store
    Load {
        /// Path to a rule JSON file
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Rules { command } => match command {
            RulesCommands::List => {
                commands::rules::list().await?;
            }
            RulesCommands::Load { file } => {
                commands::rules::load(&file).await?;
            }
        },
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
