//! Server record management command handlers.
//!
//! Handles adding, listing, editing and removing MCP server records.

use super::Context;
use clap::{Args, Subcommand};
use mcpdock_mcp::{
    AuthKind, NewServer, ServerRecord, ServerRegistry, ServerUpdate, TransportKind,
};
use serde_json::Value;

/// Server subcommands.
#[derive(Subcommand)]
pub enum ServerCommands {
    /// Register an MCP server
    Add {
        /// Server name
        name: String,
        /// Server URL
        #[arg(short, long)]
        url: String,
        /// Transport: http-stream, sse or websocket
        #[arg(short, long, default_value = "http-stream")]
        transport: TransportKind,
        /// Version the server declares
        #[arg(long, default_value = "1.0.0")]
        server_version: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// List registered servers
    List,
    /// Show one server as JSON
    Show {
        id: u64,
        /// Print tokens and client secrets instead of masking them
        #[arg(long)]
        reveal: bool,
    },
    /// Change fields of a server; pass an empty string to clear one
    Edit {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        url: Option<String>,
        #[arg(short, long)]
        transport: Option<TransportKind>,
        #[arg(long)]
        server_version: Option<String>,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Remove a server
    Remove { id: u64 },
}

/// Authentication settings shared by `add` and `edit`.
#[derive(Args)]
pub struct AuthArgs {
    /// Authentication: none, token or oauth
    #[arg(long = "auth")]
    pub auth_type: Option<AuthKind>,
    /// Bearer token for token authentication
    #[arg(long)]
    pub token: Option<String>,
    /// OAuth authorization server URL
    #[arg(long)]
    pub oauth_authorization_server: Option<String>,
    /// Pre-registered OAuth client id
    #[arg(long)]
    pub oauth_client_id: Option<String>,
    /// Pre-registered OAuth client secret
    #[arg(long)]
    pub oauth_client_secret: Option<String>,
}

/// Handle server commands.
pub async fn handle_server(command: ServerCommands, ctx: &Context) -> anyhow::Result<()> {
    let registry = ctx.registry();

    match command {
        ServerCommands::Add {
            name,
            url,
            transport,
            server_version,
            auth,
        } => {
            let auth_type = auth.auth_type.unwrap_or(if auth.token.is_some() {
                AuthKind::Token
            } else {
                AuthKind::None
            });
            let server = NewServer {
                auth_type,
                auth_token: auth.token,
                oauth_authorization_server: auth.oauth_authorization_server,
                oauth_client_id: auth.oauth_client_id,
                oauth_client_secret: auth.oauth_client_secret,
                ..NewServer::new(name, server_version, transport, url)
            };

            let record = registry.create(server).await?;
            println!("✓ Added server {} ({})", record.id, record.name);
        }
        ServerCommands::List => {
            let records = registry.list().await?;
            if records.is_empty() {
                println!("No servers registered.");
                return Ok(());
            }

            println!(
                "{:<5} {:<20} {:<12} {:<7} {}",
                "ID", "NAME", "TRANSPORT", "AUTH", "URL"
            );
            println!("{}", "-".repeat(72));
            for record in &records {
                println!(
                    "{:<5} {:<20} {:<12} {:<7} {}",
                    record.id,
                    truncate(&record.name, 20),
                    record.transport,
                    record.auth_type,
                    record.url
                );
            }
        }
        ServerCommands::Show { id, reveal } => {
            let record = registry.get(id).await?;
            let json = if reveal {
                serde_json::to_value(&record)?
            } else {
                masked(&record)?
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        ServerCommands::Edit {
            id,
            name,
            url,
            transport,
            server_version,
            auth,
        } => {
            let update = ServerUpdate {
                name,
                version: server_version,
                transport,
                url,
                auth_type: auth.auth_type,
                auth_token: auth.token,
                oauth_authorization_server: auth.oauth_authorization_server,
                oauth_client_id: auth.oauth_client_id,
                oauth_client_secret: auth.oauth_client_secret,
                oauth_client_registered: None,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to change");
            }

            let record = registry.update(id, update).await?;
            println!("✓ Updated server {} ({})", record.id, record.name);
        }
        ServerCommands::Remove { id } => {
            registry.delete(id).await?;
            println!("✓ Removed server {id}");
        }
    }

    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// JSON for a record with credentials replaced by `****`.
fn masked(record: &ServerRecord) -> serde_json::Result<Value> {
    let mut json = serde_json::to_value(record)?;
    if let Some(object) = json.as_object_mut() {
        for key in ["auth_token", "oauth_client_secret"] {
            if let Some(value) = object.get_mut(key) {
                *value = Value::String("****".to_string());
            }
        }
    }
    Ok(json)
}
