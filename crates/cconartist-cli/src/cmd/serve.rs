//! `serve`
use anyhow::{bail, Result};
use std::path::Path;
use tracing::{info, warn};

use super::load_config;
use crate::server::Server;

/// Run the configured servers until Ctrl-C.
pub async fn serve(config: Option<&Path>) -> Result<()> {
    let (path, config) = load_config(config)?;
    if config.servers.is_empty() {
        bail!("No servers configured in {}", path.display());
    }
    info!(config = %path.display(), servers = config.servers.len(), "starting");

    let server = Server::bind(&config).await?;
    println!("cconartist listening, press Ctrl-C to stop");
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
}
