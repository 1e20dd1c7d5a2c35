//! `overlay history`: Stored conversations.

use overlay_core::store::{ConversationRecord, MessageRecord};

pub async fn run(
    conversation: Option<String>,
    delete: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let Some(id) = conversation else {
        let conversations = store.list_conversations().await?;
        println!("💬 Conversations ({})", conversations.len());
        println!("==================");
        for conversation in &conversations {
            println!("{}", conversation_line(conversation));
        }
        return Ok(());
    };

    if delete {
        if store.delete_conversation(&id).await? {
            println!("  Deleted conversation {id}");
        } else {
            println!("  No conversation {id}");
        }
        return Ok(());
    }

    let Some(record) = store.get_conversation(&id).await? else {
        return Err(format!("No conversation {id}").into());
    };
    println!("💬 {}", record.title);
    println!();
    for message in store.messages(&id).await? {
        print!("{}", exchange_lines(&message));
    }

    Ok(())
}

fn conversation_line(conversation: &ConversationRecord) -> String {
    format!(
        "  {}  {}  {}",
        conversation.created_at.format("%Y-%m-%d %H:%M"),
        conversation.id,
        conversation.title
    )
}

fn exchange_lines(record: &MessageRecord) -> String {
    let mut out = format!("  You > {}\n", record.message);
    for line in record.ai_response.lines() {
        out.push_str(&format!("  Assistant > {line}\n"));
    }
    out.push('\n');
    out
}
