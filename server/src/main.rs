use clap::Parser;
use log::{error, info};
use status_server::cache::StatusCache;
use status_server::config::ServerArgs;
use status_server::http::{self, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ServerArgs::parse();

    let pipeline = args.query.pipeline()?;
    info!(
        "Watching {} master servers (timeout {}ms, policy {:?})",
        args.query.endpoints.len(),
        args.query.timeout_ms,
        pipeline.policy()
    );
    for endpoint in &args.query.endpoints {
        info!("  {}", endpoint);
    }

    // One cache for the whole process, shared by every request handler
    let cache = StatusCache::new(Arc::new(pipeline), args.ttl());
    let state = AppState {
        cache,
        embed: args.embed(),
    };

    let addr = args.listen_addr();
    let server_handle = tokio::spawn(async move { http::run(addr, state).await });

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => {
                    error!("HTTP server failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => error!("HTTP server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
