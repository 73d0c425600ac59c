//! Guarded navigation against a running Chrome
//!
//! Start Chrome with `--remote-debugging-port=9222`, then pass the browser
//! WebSocket URL (from `http://localhost:9222/json/version`) as the first argument.

use browser_pool::telemetry::{ConsoleQuery, NetworkQuery};
use browser_pool::{
    install_shutdown_handler, NavigationGuard, PoolConfig, ResourceManager, SafeNavigateOptions,
    ToolResponse,
};
use std::sync::Arc;

const MAX_RECREATIONS: u32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = PoolConfig::default();
    if let Some(url) = std::env::args().nth(1) {
        config.cdp_url = url;
    }
    println!("Connecting to Chrome at: {}", config.cdp_url);

    let manager = Arc::new(ResourceManager::with_cdp(config));
    let shutdown = install_shutdown_handler(manager.clone());
    let guard = NavigationGuard::new(manager.clone());

    let mut resource_id = manager.create_resource(None).await?;
    manager.create_child(&resource_id).await?;
    println!("Resource: {}", resource_id);

    // The guard makes one attempt per call; the loop is ours.
    // Recreation resets the attempt counter, so bound it here.
    let target = "https://example.com";
    let mut recreations = 0;
    loop {
        let report = guard
            .safe_navigate(&resource_id, target, SafeNavigateOptions::default())
            .await;
        if let Some(new_id) = report.use_new_resource_id.clone() {
            println!("Recreated {} as {}", resource_id, new_id);
            resource_id = new_id;
            recreations += 1;
        }
        let retry = report.will_retry;
        println!("{}", serde_json::to_string_pretty(&ToolResponse::from(report))?);
        if !retry {
            break;
        }
        if recreations >= MAX_RECREATIONS {
            println!("Giving up on {} after {} recreations", target, MAX_RECREATIONS);
            break;
        }
    }

    let telemetry = manager.telemetry(&resource_id)?;
    for entry in telemetry.console.query(&ConsoleQuery::default()) {
        println!("console [{}] {}", entry.level, entry.text);
    }
    let recent = telemetry.network.query(&NetworkQuery {
        limit: Some(10),
        ..Default::default()
    });
    for entry in recent {
        println!("network {} {} -> {:?}", entry.method, entry.url, entry.status);
    }
    println!("{}", serde_json::to_string_pretty(&telemetry.stats())?);

    manager.cleanup_all().await;
    shutdown.abort();
    println!("Disconnected");

    Ok(())
}
