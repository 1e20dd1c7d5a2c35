pub mod chat;
pub mod history;
pub mod tools;

use overlay_config::AppConfig;
use overlay_core::store::ConversationStore;
use overlay_mcp::{ClientOptions, ProcessLauncher, RpcClient};
use overlay_store::SqliteStore;
use std::sync::Arc;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// A client for the configured tool server. Not started yet.
pub fn tool_client(config: &AppConfig) -> RpcClient {
    let command = config.mcp.launch_command(&AppConfig::install_home());
    RpcClient::new(
        ProcessLauncher::new(command),
        ClientOptions::from(&config.mcp),
    )
}

pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn ConversationStore>, Box<dyn std::error::Error>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .await
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    Ok(Arc::new(store))
}
