//! OAuth callback listener.
//!
//! Serves `GET /oauth/callback?code&state` and resumes the pending
//! authorization attempt that issued `state`.

use super::{BrowserRedirect, Context};
use anyhow::Context as _;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use mcpdock_auth::OAUTH_CALLBACK_PATH;
use mcpdock_mcp::Connector;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// How long `auth` waits for the browser to come back.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// HTML response for successful authorization.
fn html_success(server: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>mcpdock - Authorization Successful</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #4ade80; margin-bottom: 1rem; }}
    p {{ color: #aaa; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Successful</h1>
    <p>mcpdock can now connect to {}. You can close this window.</p>
  </div>
  <script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#,
        html_escape(server)
    )
}

/// HTML response for failed authorization.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>mcpdock - Authorization Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #f87171; margin-bottom: 1rem; }}
    p {{ color: #aaa; }}
    .error {{ color: #fca5a5; font-family: monospace; margin-top: 1rem; padding: 1rem; background: rgba(248,113,113,0.1); border-radius: 0.5rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Authorization Failed</h1>
    <p>Run <code>mcpdock auth</code> again to restart authorization.</p>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// What one callback request ended in.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub state: Option<String>,
    /// Server name on success, error message otherwise.
    pub result: Result<String, String>,
}

#[derive(Clone)]
struct CallbackState {
    connector: Arc<Connector>,
    completed: Option<mpsc::UnboundedSender<CallbackOutcome>>,
}

impl CallbackState {
    fn report(&self, outcome: CallbackOutcome) {
        if let Some(tx) = &self.completed {
            let _ = tx.send(outcome);
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    if let Some(error) = params.error {
        let message = match params.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        warn!(error = %message, "Authorization server returned an error");
        state.report(CallbackOutcome {
            state: params.state,
            result: Err(message.clone()),
        });
        return (StatusCode::BAD_REQUEST, Html(html_error(&message)));
    }

    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(html_error("Missing code or state parameter")),
        );
    };

    match state.connector.complete_by_state(&oauth_state, &code).await {
        Ok((record, _tokens)) => {
            info!(id = record.id, server = %record.url, "Authorization callback completed");
            let page = html_success(&record.name);
            state.report(CallbackOutcome {
                state: Some(oauth_state),
                result: Ok(record.name),
            });
            (StatusCode::OK, Html(page))
        }
        Err(e) => {
            warn!(error = %e, "Authorization callback failed");
            let message = e.to_string();
            state.report(CallbackOutcome {
                state: Some(oauth_state),
                result: Err(message.clone()),
            });
            (StatusCode::BAD_REQUEST, Html(html_error(&message)))
        }
    }
}

/// Router serving the callback endpoint.
pub fn callback_router(
    connector: Arc<Connector>,
    completed: Option<mpsc::UnboundedSender<CallbackOutcome>>,
) -> Router {
    Router::new()
        .route(OAUTH_CALLBACK_PATH, get(handle_callback))
        .with_state(CallbackState {
            connector,
            completed,
        })
}

/// Serve callbacks until the one for `state` arrives, or `timeout` passes.
///
/// Returns the name of the authorized server.
pub async fn wait_for_callback(
    listener: TcpListener,
    connector: Arc<Connector>,
    state: &str,
    timeout: Duration,
) -> anyhow::Result<String> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let app = callback_router(connector, Some(tx));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let outcome = tokio::time::timeout(timeout, async {
        while let Some(outcome) = rx.recv().await {
            // Callbacks for other attempts are still served, just not awaited
            if outcome.state.as_deref().map_or(true, |s| s == state) {
                return Some(outcome.result);
            }
        }
        None
    })
    .await;

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server.await {
        warn!(error = %e, "Callback listener stopped with an error");
    }

    match outcome {
        Ok(Some(Ok(server))) => Ok(server),
        Ok(Some(Err(message))) => anyhow::bail!("Authorization failed: {message}"),
        Ok(None) => anyhow::bail!("Callback listener stopped before authorization completed"),
        Err(_) => anyhow::bail!("Timed out waiting for the authorization callback"),
    }
}

/// Run the callback listener until interrupted.
pub async fn handle_callback_server(
    ctx: &Context,
    address: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let address = address.unwrap_or_else(|| ctx.config.callback_address());
    let connector = Arc::new(ctx.connector(Arc::new(BrowserRedirect::new(false))));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind callback listener on {address}"))?;

    println!("Listening for OAuth callbacks on http://{address}{OAUTH_CALLBACK_PATH}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, callback_router(connector, None))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
