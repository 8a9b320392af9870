//! Describe command: connect to a server and list what it offers.

use super::{BrowserRedirect, Context};
use mcpdock_mcp::{ConnectOutcome, ServerDescription};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Output of `mcpdock describe`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeOutput<'a> {
    id: u64,
    name: &'a str,
    server_info: &'a mcpdock_mcp::ServerInfo,
    protocol_version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(flatten)]
    description: ServerDescription,
}

/// Handle `mcpdock describe <id>`.
pub async fn handle_describe(ctx: &Context, id: u64, open_browser: bool) -> anyhow::Result<()> {
    let connector = ctx.connector(Arc::new(BrowserRedirect::new(open_browser)));
    let record = connector.registry().get(id).await?;

    let session = match connector.open(id).await? {
        ConnectOutcome::Connected(session) => session,
        ConnectOutcome::AuthorizationPending(request) => {
            println!(
                "Server {id} needs authorization from {}.",
                request.authorization_server
            );
            println!("Finish it in the browser, then run `mcpdock describe {id}` again.");
            println!("Or run `mcpdock auth {id}` to wait for the callback.");
            return Ok(());
        }
    };

    let description = session.describe().await;
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close session");
    }
    let description = description?;

    let output = DescribeOutput {
        id,
        name: &record.name,
        server_info: session.server_info(),
        protocol_version: session.protocol_version(),
        instructions: session.instructions(),
        description,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
