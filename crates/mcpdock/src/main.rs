//! mcpdock - register, authorize and inspect remote MCP servers.
//!
//! This is the main entry point for the mcpdock CLI.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{
    handle_auth, handle_callback_server, handle_describe, handle_server, init_logging,
    AuthCommands, AuthorizeOptions, Context, ServerCommands,
};
use config::Config;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "mcpdock")]
#[command(author, version, about = "Register, authorize and inspect remote MCP servers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered servers
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Connect to a server and print its tools, prompts and resources
    Describe {
        id: u64,
        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Authorize with a server's OAuth authorization server
    #[command(args_conflicts_with_subcommands = true)]
    Auth {
        /// Server to authorize
        id: Option<u64>,
        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
        /// Do not wait for the callback
        #[arg(long)]
        no_wait: bool,
        #[command(subcommand)]
        command: Option<AuthCommands>,
    },
    /// Run the OAuth callback listener
    Callback {
        /// Address to bind to (defaults to the redirect URL's port on localhost)
        #[arg(short, long)]
        address: Option<SocketAddr>,
    },
    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let (config, sources) = Config::load(Some(&cwd)).await?;

    init_logging(cli.verbose, config.log_level(), config.log_file.clone());

    if let Commands::Config = cli.command {
        return show_config(&config, &sources);
    }

    let ctx = Context::new(config)?;

    match cli.command {
        Commands::Server { command } => handle_server(command, &ctx).await,
        Commands::Describe { id, no_browser } => handle_describe(&ctx, id, !no_browser).await,
        Commands::Auth {
            id,
            no_browser,
            no_wait,
            command,
        } => {
            handle_auth(
                &ctx,
                id,
                AuthorizeOptions {
                    no_browser,
                    no_wait,
                },
                command,
            )
            .await
        }
        Commands::Callback { address } => handle_callback_server(&ctx, address).await,
        Commands::Config => Ok(()),
    }
}

/// Print the resolved configuration and where it came from.
fn show_config(config: &Config, sources: &[std::path::PathBuf]) -> anyhow::Result<()> {
    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in sources {
            println!("  {}", source.display());
        }
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();

    match config.data_dir() {
        Some(dir) => println!("Data directory: {}", dir.display()),
        None => println!("Data directory: (unavailable)"),
    }
    println!("Redirect URL:   {}", config.redirect_url());
    println!("Callback:       {}", config.callback_address());
    println!("Timeout:        {}s", config.timeout().as_secs());

    Ok(())
}
