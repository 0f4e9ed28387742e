use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "agentbudget")]
#[command(about = "Dollar budgets and loop protection for AI agents", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated agent under a budget and print its cost report
    Demo {
        /// Budget cap, e.g. "$0.50" (defaults to the configured max_spend)
        #[arg(short, long)]
        budget: Option<String>,
        /// Simulate an agent stuck retrying the same tool
        #[arg(long)]
        runaway: bool,
        /// Config file (defaults to ~/.agentbudget/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Compute the cost of an LLM call
    Price {
        /// Model name, e.g. gpt-4o or claude-3-5-sonnet-20241022
        model: String,
        /// Input (prompt) tokens
        #[arg(short, long, default_value_t = 0)]
        input: u64,
        /// Output (completion) tokens
        #[arg(short, long, default_value_t = 0)]
        output: u64,
    },
    /// List built-in model prices
    Models,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Some(Commands::Version) | None => {
            println!("agentbudget {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Demo {
            budget,
            runaway,
            config,
        }) => {
            cli::demo::cmd_demo(budget, runaway, config).await?;
        }
        Some(Commands::Price {
            model,
            input,
            output,
        }) => {
            cli::pricing::cmd_price(&model, input, output);
        }
        Some(Commands::Models) => {
            cli::pricing::cmd_models();
        }
    }

    Ok(())
}
