//! `overlay tools`: List the tools the tool server exposes.

use overlay_core::tool::{ToolDescriptor, ToolSource};
use overlay_tools::{LocalTool, McpToolBridge};
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let client = Arc::new(super::tool_client(&config));
    client.start().await?;

    let listing = McpToolBridge::new(client.clone()).list_tools().await;
    client.stop().await;
    let tools = listing?;

    println!("🧰 Tool Server Tools");
    println!("====================");
    if tools.is_empty() {
        println!("  (none)");
    }
    for tool in &tools {
        println!("{}", describe(tool));
    }
    println!();
    println!(
        "  Local UI tools: {}",
        LocalTool::ALL.map(LocalTool::name).join(", ")
    );

    Ok(())
}

fn describe(tool: &ToolDescriptor) -> String {
    match tool.description.as_deref().filter(|d| !d.is_empty()) {
        Some(description) => format!("  {:<24} {description}", tool.name),
        None => format!("  {}", tool.name),
    }
}
