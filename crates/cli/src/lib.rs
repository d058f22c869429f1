pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::chat::ChatOptions;

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Relay agent console",
    long_about = "Talk to the configured agent directly, or to a running relay-server, and inspect effective configuration.",
    after_help = "Examples:\n  relay chat\n  relay client --url http://localhost:7071\n  relay config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Hold one agent session and chat with it until `exit`, `quit` or a blank line")]
    Chat {
        #[arg(long, help = "Model id for this session (overrides RELAY_MODEL)")]
        model: Option<String>,
        #[arg(long, help = "System instructions for this session")]
        instructions: Option<String>,
        #[arg(long = "backend-url", help = "Base URL of the default chat-completions backend")]
        backend_url: Option<String>,
    },
    #[command(about = "Chat with a running relay-server over HTTP")]
    Client {
        #[arg(long, help = "Service base URL (overrides AGENT_URL)")]
        url: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { model, instructions, backend_url } => {
            commands::chat::run(ChatOptions { model, instructions, backend_url })
        }
        Command::Client { url } => commands::client::run(url),
        Command::Config => commands::config::run(),
    };

    if result.exit_code == 0 {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
    } else {
        eprintln!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
