//! Core data models used throughout Deskline.
//!
//! These types represent the users, conversations, messages, and retrieved
//! source documents that flow through the chat pipeline, plus the
//! knowledge-base and ticketing entities persisted alongside them.

use serde::{Deserialize, Serialize};

/// Conversation lifecycle status. Conversations are never hard-deleted by
/// the chat flows — a finished conversation is closed, not destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "closed" => Some(ConversationStatus::Closed),
            _ => None,
        }
    }
}

/// Author of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// An end user owning conversations and tickets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// A support-chat conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single turn half. Immutable once created except for feedback
/// attachment; ordered by creation time ascending within a conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: i64,
}

/// JSON metadata column attached to a message at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Source citations grounding an assistant reply.
    #[serde(default)]
    pub sources: Vec<SourceDocument>,
    /// Whether the originating query was inside the supported topic domain.
    #[serde(default = "default_supported")]
    pub supported_topic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hint: Option<String>,
}

fn default_supported() -> bool {
    true
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            supported_topic: true,
            category: None,
            device_hint: None,
        }
    }
}

/// A retrieved source document: read-only grounding evidence for exactly
/// one synthesis call, attached to the resulting message's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub title: String,
    pub url: String,
    pub excerpt: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// Append-only audit record written when a conversation is closed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub summary: String,
    pub created_at: i64,
}

/// Post-hoc end-user rating of an assistant message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFeedback {
    pub id: String,
    pub message_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: i64,
}

/// A generated knowledge-base article.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub topic: String,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub created_at: i64,
}

/// A reported problem in the ticketing sub-app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A proposed solution to a problem. May be AI-generated and carries an
/// optional 1–5 rating.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    pub content: String,
    pub ai_generated: bool,
    pub rating: Option<i64>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(
            ConversationStatus::parse("active"),
            Some(ConversationStatus::Active)
        );
        assert_eq!(
            ConversationStatus::parse("closed"),
            Some(ConversationStatus::Closed)
        );
        assert_eq!(ConversationStatus::parse("archived"), None);
        assert_eq!(ConversationStatus::Closed.as_str(), "closed");
    }

    #[test]
    fn test_role_roundtrip() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_metadata_json_roundtrip() {
        let meta = MessageMetadata {
            sources: vec![SourceDocument {
                title: "Fixing BSOD".to_string(),
                url: "https://example.com/bsod".to_string(),
                excerpt: "Check your drivers first.".to_string(),
                score: 0.91,
                published_at: Some("2024-11-02".to_string()),
            }],
            supported_topic: true,
            category: Some("hardware".to_string()),
            device_hint: Some("Dell".to_string()),
        };

        let json = serde_json::to_string(&meta).unwrap();
        let restored: MessageMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, restored);
    }

    #[test]
    fn test_metadata_defaults_from_empty_object() {
        let meta: MessageMetadata = serde_json::from_str("{}").unwrap();
        assert!(meta.sources.is_empty());
        assert!(meta.supported_topic);
        assert!(meta.category.is_none());
    }
}
