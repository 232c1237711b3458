//! Short-term context window rebuilt from the turn log.

use crate::conversation::model::{ConversationTurn, Direction};
use crate::error::DatabaseError;
use crate::store::Database;

/// Render turns oldest-first as `User: …` / `Bot: …` lines.
pub fn render_context(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let who = match turn.direction {
                Direction::In => "User",
                Direction::Out => "Bot",
            };
            let text = match (&turn.recommendation, turn.text.is_empty()) {
                (Some(rec), true) => rec.as_str(),
                _ => turn.text.as_str(),
            };
            format!("{who}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Load and render the last `limit` turns for `sender`.
pub async fn load_context(
    db: &dyn Database,
    sender: &str,
    limit: usize,
) -> Result<String, DatabaseError> {
    let turns = db.recent_turns(sender, limit).await?;
    tracing::debug!(sender, turns = turns.len(), "Loaded context");
    Ok(render_context(&turns))
}

/// Prompt for a free-form reply continuing the conversation.
pub fn chat_prompt(context: &str, message: &str) -> String {
    format!(
        "Continue the conversation based on this chat history:\n\n{context}\n\nUser: {message}\nBot:"
    )
}
