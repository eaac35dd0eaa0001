//! Persistence gateway over the relational store.
//!
//! Typed CRUD accessors for every persisted entity. Each operation is a
//! single round trip; the only multi-row unit of work in the system is the
//! conversation rotation in [`crate::lifecycle`], which owns its own
//! transaction.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Article, Conversation, ConversationStatus, ConversationSummary, Message, MessageFeedback,
    MessageMetadata, Problem, Role, Solution, User,
};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Users ============

    pub async fn create_user(&self, email: &str, display_name: Option<&str>) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            display_name: display_name.map(|s| s.to_string()),
            created_at: now_ms(),
        };

        sqlx::query("INSERT INTO users (id, email, display_name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, display_name, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            email: r.get("email"),
            display_name: r.get("display_name"),
            created_at: r.get("created_at"),
        }))
    }

    // ============ Conversations ============

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let now = now_ms();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.map(|s| s.to_string()),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.status.as_str())
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, status, created_at, updated_at
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    pub async fn set_conversation_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, status, created_at, updated_at
             FROM conversations WHERE user_id = ?
             ORDER BY updated_at DESC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    // ============ Messages ============

    pub async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: &MessageMetadata,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: now_ms(),
        };

        let metadata_json =
            serde_json::to_string(metadata).context("Failed to serialize message metadata")?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&metadata_json)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, role, content, metadata_json, created_at
             FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }

    /// Messages in a conversation, creation order. Rowid breaks ties so a
    /// user/assistant pair written in the same millisecond keeps its order.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, metadata_json, created_at
             FROM messages WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    pub async fn count_assistant_messages(&self, conversation_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND role = 'assistant'",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // ============ Conversation history ============

    pub async fn list_summaries_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT id, user_id, conversation_id, summary, created_at
             FROM conversation_history WHERE user_id = ?
             ORDER BY created_at DESC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationSummary {
                id: r.get("id"),
                user_id: r.get("user_id"),
                conversation_id: r.get("conversation_id"),
                summary: r.get("summary"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ============ Feedback ============

    pub async fn create_feedback(
        &self,
        message_id: &str,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<MessageFeedback> {
        let feedback = MessageFeedback {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            rating,
            comment: comment.map(|s| s.to_string()),
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO message_feedback (id, message_id, rating, comment, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&feedback.id)
        .bind(&feedback.message_id)
        .bind(feedback.rating)
        .bind(&feedback.comment)
        .bind(feedback.created_at)
        .execute(&self.pool)
        .await?;

        Ok(feedback)
    }

    pub async fn list_feedback_for_message(&self, message_id: &str) -> Result<Vec<MessageFeedback>> {
        let rows = sqlx::query(
            "SELECT id, message_id, rating, comment, created_at
             FROM message_feedback WHERE message_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MessageFeedback {
                id: r.get("id"),
                message_id: r.get("message_id"),
                rating: r.get("rating"),
                comment: r.get("comment"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ============ Articles ============

    pub async fn create_article(
        &self,
        topic: &str,
        title: &str,
        content: &str,
        category: Option<&str>,
    ) -> Result<Article> {
        let article = Article {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            category: category.map(|s| s.to_string()),
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO articles (id, topic, title, content, category, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&article.id)
        .bind(&article.topic)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.category)
        .bind(article.created_at)
        .execute(&self.pool)
        .await?;

        Ok(article)
    }

    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT id, topic, title, content, category, created_at
             FROM articles ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Article {
                id: r.get("id"),
                topic: r.get("topic"),
                title: r.get("title"),
                content: r.get("content"),
                category: r.get("category"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    // ============ Problems & solutions ============

    pub async fn create_problem(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Problem> {
        let now = now_ms();
        let problem = Problem {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO problems (id, user_id, title, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&problem.id)
        .bind(&problem.user_id)
        .bind(&problem.title)
        .bind(&problem.description)
        .bind(problem.created_at)
        .bind(problem.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(problem)
    }

    pub async fn get_problem(&self, id: &str) -> Result<Option<Problem>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, description, created_at, updated_at
             FROM problems WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Problem {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            description: r.get("description"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    pub async fn list_problems(&self) -> Result<Vec<Problem>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, description, created_at, updated_at
             FROM problems ORDER BY created_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Problem {
                id: r.get("id"),
                user_id: r.get("user_id"),
                title: r.get("title"),
                description: r.get("description"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    pub async fn create_solution(
        &self,
        problem_id: &str,
        user_id: &str,
        content: &str,
        ai_generated: bool,
    ) -> Result<Solution> {
        let solution = Solution {
            id: Uuid::new_v4().to_string(),
            problem_id: problem_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            ai_generated,
            rating: None,
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO solutions (id, problem_id, user_id, content, ai_generated, rating, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&solution.id)
        .bind(&solution.problem_id)
        .bind(&solution.user_id)
        .bind(&solution.content)
        .bind(solution.ai_generated as i64)
        .bind(solution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(solution)
    }

    pub async fn list_solutions(&self, problem_id: &str) -> Result<Vec<Solution>> {
        let rows = sqlx::query(
            "SELECT id, problem_id, user_id, content, ai_generated, rating, created_at
             FROM solutions WHERE problem_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Solution {
                id: r.get("id"),
                problem_id: r.get("problem_id"),
                user_id: r.get("user_id"),
                content: r.get("content"),
                ai_generated: r.get::<i64, _>("ai_generated") != 0,
                rating: r.get("rating"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn rate_solution(&self, solution_id: &str, rating: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE solutions SET rating = ? WHERE id = ?")
            .bind(rating)
            .bind(solution_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============ Row mapping ============

fn conversation_from_row(r: SqliteRow) -> Result<Conversation> {
    let status_str: String = r.get("status");
    let status = ConversationStatus::parse(&status_str)
        .with_context(|| format!("Unknown conversation status in store: {}", status_str))?;

    Ok(Conversation {
        id: r.get("id"),
        user_id: r.get("user_id"),
        title: r.get("title"),
        status,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn message_from_row(r: SqliteRow) -> Result<Message> {
    let role_str: String = r.get("role");
    let role = Role::parse(&role_str)
        .with_context(|| format!("Unknown message role in store: {}", role_str))?;

    let metadata_json: String = r.get("metadata_json");
    let metadata: MessageMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| "Failed to parse message metadata_json")?;

    Ok(Message {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        role,
        content: r.get("content"),
        metadata,
        created_at: r.get("created_at"),
    })
}
