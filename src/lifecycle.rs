//! Conversation lifecycle manager.
//!
//! Tracks assistant-reply counts per conversation, closes a conversation
//! once the configured response limit is reached, archives a one-line
//! summary, and opens a successor conversation for the same user.
//!
//! Failure policy is split on purpose:
//! - The closed/at-limit READS fail open — a transient datastore error
//!   must never wrongly block a user from chatting.
//! - The close-and-rotate WRITE fails closed — if the rotation cannot be
//!   guaranteed, the error propagates.
//!
//! The rotation itself runs in a single database transaction, so a crash
//! mid-rotation leaves either the old state (the next turn's limit check
//! re-drives it) or the complete new state, never a half-closed
//! conversation.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::models::{Conversation, ConversationStatus, Role};
use crate::store::Store;

/// Maximum summary length in characters before truncation.
const SUMMARY_CAP: usize = 50;

const SUMMARY_FALLBACK: &str = "Support conversation";

/// Outcome of the post-turn limit check.
#[derive(Debug)]
pub struct TurnOutcome {
    pub limit_reached: bool,
    pub new_conversation: Option<Conversation>,
}

pub struct LifecycleManager {
    store: Store,
    response_limit: i64,
}

impl LifecycleManager {
    pub fn new(store: Store, response_limit: i64) -> Self {
        Self {
            store,
            response_limit,
        }
    }

    /// Whether the conversation is closed. Datastore errors log and
    /// report "open" — fail open.
    pub async fn is_closed(&self, conversation_id: &str) -> bool {
        match self.store.get_conversation(conversation_id).await {
            Ok(Some(c)) => c.status == ConversationStatus::Closed,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    error = %e,
                    "Closed-check failed, treating conversation as open"
                );
                false
            }
        }
    }

    /// Run the limit check for a conversation. Must be called strictly
    /// AFTER the turn's user and assistant messages are durably persisted,
    /// otherwise the boundary turn is miscounted.
    ///
    /// The count read fails open; the rotation write fails closed.
    pub async fn finalize_turn(&self, conversation: &Conversation) -> Result<TurnOutcome> {
        let count = match self
            .store
            .count_assistant_messages(&conversation.id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "Limit check failed, treating conversation as under limit"
                );
                return Ok(TurnOutcome {
                    limit_reached: false,
                    new_conversation: None,
                });
            }
        };

        if count < self.response_limit {
            return Ok(TurnOutcome {
                limit_reached: false,
                new_conversation: None,
            });
        }

        let new_conversation = self.close_and_rotate(conversation).await?;
        tracing::info!(
            closed = %conversation.id,
            opened = %new_conversation.id,
            assistant_count = count,
            "Conversation reached response limit, rotated"
        );

        Ok(TurnOutcome {
            limit_reached: true,
            new_conversation: Some(new_conversation),
        })
    }

    /// Close the conversation, archive its summary, and open a successor —
    /// one transaction, so the invariant "at or over the limit implies
    /// closed" survives a crash between steps.
    async fn close_and_rotate(&self, conversation: &Conversation) -> Result<Conversation> {
        let first_user_message = self
            .store
            .list_messages(&conversation.id)
            .await?
            .into_iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content);

        let summary = derive_summary(first_user_message.as_deref());
        let now = chrono::Utc::now().timestamp_millis();

        let successor = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: conversation.user_id.clone(),
            title: conversation.title.clone(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .context("Failed to begin rotation transaction")?;

        sqlx::query("UPDATE conversations SET status = 'closed', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO conversation_history (id, user_id, conversation_id, summary, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&conversation.user_id)
        .bind(&conversation.id)
        .bind(&summary)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&successor.id)
        .bind(&successor.user_id)
        .bind(&successor.title)
        .bind(successor.status.as_str())
        .bind(successor.created_at)
        .bind(successor.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .context("Failed to commit rotation transaction")?;

        Ok(successor)
    }
}

/// Summary text for the history row: the first user message truncated to
/// [`SUMMARY_CAP`] characters with an ellipsis, or a generic fallback.
fn derive_summary(first_user_message: Option<&str>) -> String {
    match first_user_message {
        Some(text) if !text.trim().is_empty() => {
            let text = text.trim();
            if text.chars().count() > SUMMARY_CAP {
                let truncated: String = text.chars().take(SUMMARY_CAP).collect();
                format!("{}...", truncated)
            } else {
                text.to_string()
            }
        }
        _ => SUMMARY_FALLBACK.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_short_message_kept_verbatim() {
        assert_eq!(derive_summary(Some("Printer is offline")), "Printer is offline");
    }

    #[test]
    fn test_summary_long_message_truncated_with_ellipsis() {
        let long = "My laptop keeps disconnecting from the office wifi every ten minutes";
        let summary = derive_summary(Some(long));
        assert_eq!(summary.chars().count(), SUMMARY_CAP + 3);
        assert!(summary.ends_with("..."));
        assert!(long.starts_with(summary.trim_end_matches("...")));
    }

    #[test]
    fn test_summary_exactly_at_cap_not_truncated() {
        let exact: String = "a".repeat(SUMMARY_CAP);
        assert_eq!(derive_summary(Some(&exact)), exact);
    }

    #[test]
    fn test_summary_missing_or_blank_uses_fallback() {
        assert_eq!(derive_summary(None), SUMMARY_FALLBACK);
        assert_eq!(derive_summary(Some("   ")), SUMMARY_FALLBACK);
    }
}
