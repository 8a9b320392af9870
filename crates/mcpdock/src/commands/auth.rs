//! Authorization command handlers.
//!
//! Handles starting, completing and forgetting OAuth authorization for
//! registered servers.

use super::{wait_for_callback, Context, CALLBACK_TIMEOUT};
use async_trait::async_trait;
use clap::Subcommand;
use mcpdock_auth::{AuthResult, AuthorizationRedirect};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::warn;
use url::Url;

/// Authorization subcommands.
#[derive(Subcommand)]
pub enum AuthCommands {
    /// Finish an authorization with the code from the redirect
    Complete {
        id: u64,
        #[arg(long)]
        code: String,
        /// State from the redirect; checked against the pending attempt
        #[arg(long)]
        state: Option<String>,
    },
    /// Forget stored OAuth tokens and client registration for a server
    Logout { id: u64 },
}

/// Sends the user to the authorization URL in a browser.
pub struct BrowserRedirect {
    open_browser: bool,
}

impl BrowserRedirect {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

#[async_trait]
impl AuthorizationRedirect for BrowserRedirect {
    async fn redirect(&self, server_url: &str, authorization_url: &Url) -> AuthResult<()> {
        println!("Authorize mcpdock for {server_url}:");
        println!();
        println!("  {authorization_url}");
        println!();

        if self.open_browser {
            if let Err(e) = open::that(authorization_url.as_str()) {
                // The URL is printed above, so the user can still open it
                warn!(error = %e, "Could not open a browser");
            }
        }
        Ok(())
    }
}

/// Options for `mcpdock auth <id>`.
pub struct AuthorizeOptions {
    pub no_browser: bool,
    pub no_wait: bool,
}

/// Handle `mcpdock auth`.
pub async fn handle_auth(
    ctx: &Context,
    id: Option<u64>,
    options: AuthorizeOptions,
    command: Option<AuthCommands>,
) -> anyhow::Result<()> {
    match command {
        Some(AuthCommands::Complete { id, code, state }) => {
            let connector = ctx.connector(Arc::new(BrowserRedirect::new(false)));
            connector
                .complete_authorization(id, &code, state.as_deref())
                .await?;
            println!("✓ Authorized server {id}");
        }
        Some(AuthCommands::Logout { id }) => {
            let connector = ctx.connector(Arc::new(BrowserRedirect::new(false)));
            connector.logout(id).await?;
            println!("✓ Forgot OAuth credentials for server {id}");
        }
        None => {
            let Some(id) = id else {
                anyhow::bail!("Specify a server id, or one of: complete, logout");
            };
            authorize(ctx, id, options).await?;
        }
    }

    Ok(())
}

async fn authorize(ctx: &Context, id: u64, options: AuthorizeOptions) -> anyhow::Result<()> {
    let connector = Arc::new(ctx.connector(Arc::new(BrowserRedirect::new(!options.no_browser))));

    // Bind before redirecting so the browser cannot come back too early
    let listener = if options.no_wait {
        None
    } else {
        let address = ctx.config.callback_address();
        match TcpListener::bind(address).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(%address, error = %e, "Could not bind the callback listener");
                None
            }
        }
    };

    let request = connector.begin_authorization(id).await?;

    let Some(listener) = listener else {
        println!("When the browser redirects back, finish with:");
        println!("  mcpdock auth complete {id} --code <code> --state {}", request.state);
        println!("or keep `mcpdock callback` running to complete it automatically.");
        return Ok(());
    };

    println!("Waiting for authorization (Ctrl+C to cancel)...");
    let server = wait_for_callback(listener, connector, &request.state, CALLBACK_TIMEOUT).await?;
    println!("✓ Authorized {server}");
    Ok(())
}
