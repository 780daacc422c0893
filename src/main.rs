//! Defender Graph MCP Server
//!
//! Entry point for the MCP server binary.
//! Implements MCP protocol over stdio using JSON-RPC 2.0.

use anyhow::Context;
use defender_graph_mcp::config::Config;
use defender_graph_mcp::graph::GraphClient;
use defender_graph_mcp::mcp::{
    GraphMcpServer, JsonRpcRequest, JsonRpcResponse, ServerSettings, PARSE_ERROR,
};
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (MCP uses stdout for protocol)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    tracing::info!("Starting Defender Graph MCP Server...");

    // Missing credentials stop the process here, not on the first tool call
    let config = Config::load_default().context("Failed to load configuration")?;
    let runtime_config = config.to_runtime().context("Invalid configuration")?;

    tracing::info!(
        "Configured for tenant {} at {}",
        runtime_config.tenant_id,
        runtime_config.graph_base_url
    );

    let client = Arc::new(GraphClient::from_config(&runtime_config));
    let server = Arc::new(GraphMcpServer::new(
        client,
        ServerSettings::from(&runtime_config),
    ));

    tracing::info!("MCP Server ready, listening on stdio...");

    run_stdio_loop(server).await
}

/// Read newline-delimited requests and answer each on its own task
async fn run_stdio_loop(server: Arc<GraphMcpServer>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            if let Err(e) = send_response(&mut stdout, &response).await {
                tracing::error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                queue_response(
                    &tx,
                    JsonRpcResponse::error(None, PARSE_ERROR, &format!("Parse error: {}", e)),
                );
                continue;
            }
        };

        let server = Arc::clone(&server);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle_request(request).await {
                queue_response(&tx, response);
            }
        });
    }

    tracing::info!("stdin closed, draining in-flight requests");
    drop(tx);
    writer.await.context("Response writer task failed")?;
    Ok(())
}

/// Hand a response to the writer task. False once the writer has stopped.
fn queue_response(tx: &mpsc::UnboundedSender<JsonRpcResponse>, response: JsonRpcResponse) -> bool {
    match tx.send(response) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Response writer has stopped, dropping reply to id {}", e.0.id);
            false
        }
    }
}

async fn send_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> io::Result<()> {
    let mut json = serde_json::to_string(response)?;
    tracing::debug!("Sending: {}", json);
    json.push('\n');
    stdout.write_all(json.as_bytes()).await?;
    stdout.flush().await
}
