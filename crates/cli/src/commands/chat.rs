//! `overlay chat`: Interactive or single-message chat mode.

use crate::terminal::{TerminalEvents, TerminalSurface};
use overlay_agent::{TurnRequest, TurnRunner};
use overlay_providers::OllamaProvider;
use overlay_tools::McpToolBridge;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use uuid::Uuid;

pub async fn run(
    message: Option<String>,
    conversation: Option<String>,
    mut skip_tools: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    let provider = Arc::new(
        OllamaProvider::from_config(&config.llm)
            .map_err(|e| format!("Failed to create provider: {e}"))?,
    );

    let client = Arc::new(super::tool_client(&config));
    if !skip_tools && let Err(e) = client.start().await {
        warn!(error = %e, "Tool server unavailable");
        eprintln!("  Tool server unavailable ({e}); answering without tools.");
        skip_tools = true;
    }

    let store = super::open_store(&config).await?;
    let runner = TurnRunner::from_config(
        &config,
        provider,
        Arc::new(McpToolBridge::new(client.clone())),
        Arc::new(TerminalEvents),
    )
    .with_store(store)
    .with_surface(Arc::new(TerminalSurface));

    let conversation_id = conversation.unwrap_or_else(|| Uuid::new_v4().to_string());
    let turn = |text: String| {
        let mut request = TurnRequest::new(text).in_conversation(conversation_id.clone());
        request.skip_tools = skip_tools;
        request
    };

    let result: Result<(), Box<dyn std::error::Error>> = if let Some(msg) = message {
        // Single message mode
        runner
            .run(turn(msg))
            .await
            .map(|_| ())
            .map_err(|_| "Turn failed".into())
    } else {
        interactive(&runner, &config.llm.model, &conversation_id, skip_tools, turn).await
    };

    client.stop().await;
    result
}

async fn interactive(
    runner: &TurnRunner,
    model: &str,
    conversation_id: &str,
    skip_tools: bool,
    turn: impl Fn(String) -> TurnRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("  Overlay Agent: Interactive Mode");
    println!();
    println!("  Model:         {model}");
    println!("  Tools:         {}", if skip_tools { "off" } else { "on" });
    println!("  Conversation:  {conversation_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        // Failures were already printed as the turn's error event
        let _ = runner.run(turn(line.to_string())).await;
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}
