//! Overlay agent CLI: a terminal host for the overlay agent.
//!
//! Commands:
//! - `chat`: Single message or interactive chat, with tool selection
//! - `tools`: List the tools the tool server exposes
//! - `history`: Show stored conversations

use clap::{Parser, Subcommand};

mod commands;
mod terminal;

#[derive(Parser, Debug)]
#[command(
    name = "overlay",
    about = "Overlay agent: local tools and a local model behind one prompt",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a stored conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Answer without selecting a tool
        #[arg(long)]
        skip_tools: bool,
    },

    /// List the tools exposed by the tool server
    Tools,

    /// List conversations, or show one
    History {
        /// Conversation to show
        #[arg(short, long)]
        conversation: Option<String>,

        /// Delete the conversation instead of showing it
        #[arg(long, requires = "conversation")]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            conversation,
            skip_tools,
        } => commands::chat::run(message, conversation, skip_tools).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::History {
            conversation,
            delete,
        } => commands::history::run(conversation, delete).await?,
    }

    Ok(())
}
