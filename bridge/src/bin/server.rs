use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use voxpipe_bridge::build_server;
use voxpipe_core::VoxpipeConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // stdout carries protocol frames only
    fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = VoxpipeConfig::load();
    let server = match build_server(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!(target: "mcp_server", error = %e, "Failed to start");
            return Err(e.into());
        }
    };

    tracing::info!(
        target: "mcp_server",
        tools = server.registry().list_tools().len(),
        player = %config.player.program.display(),
        "voxpipe MCP server ready on stdio"
    );

    server
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await?;

    tracing::info!(target: "mcp_server", "Input closed; shutting down");
    Ok(())
}
