//! Chat turn orchestration.
//!
//! One inbound message flows: validation → closed-conversation gate →
//! domain classification → source retrieval (cache-checked) → answer
//! synthesis → persistence of both turn halves → lifecycle limit check.
//!
//! Classification and the lifecycle reads fail open; retrieval and
//! synthesis fail closed — the [`ChatError`] variants carry that split to
//! the HTTP layer.

use thiserror::Error;

use crate::classifier::DomainClassifier;
use crate::lifecycle::LifecycleManager;
use crate::llm::LlmError;
use crate::models::{Conversation, ConversationStatus, Message, MessageMetadata, Role};
use crate::retriever::SourceRetriever;
use crate::store::Store;
use crate::synthesizer::AnswerSynthesizer;
use crate::websearch::{SearchError, SearchOptions};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("conversation is closed, start a new conversation")]
    ConversationClosed,
    #[error(transparent)]
    Retrieval(#[from] SearchError),
    #[error(transparent)]
    Generation(#[from] LlmError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of one processed turn. `out_of_domain` turns are persisted like
/// any other but carry the fixed rejection reply and made no provider
/// calls; the HTTP layer surfaces them as a policy rejection.
#[derive(Debug)]
pub struct ProcessedTurn {
    pub user_message: Message,
    pub assistant_message: Message,
    pub response: String,
    pub out_of_domain: bool,
    pub limit_reached: bool,
    pub new_conversation: Option<Conversation>,
}

pub struct ChatService {
    store: Store,
    classifier: DomainClassifier,
    retriever: SourceRetriever,
    synthesizer: AnswerSynthesizer,
    lifecycle: LifecycleManager,
    default_options: SearchOptions,
    rejection_message: String,
}

impl ChatService {
    pub fn new(
        store: Store,
        classifier: DomainClassifier,
        retriever: SourceRetriever,
        synthesizer: AnswerSynthesizer,
        lifecycle: LifecycleManager,
        default_options: SearchOptions,
        rejection_message: String,
    ) -> Self {
        Self {
            store,
            classifier,
            retriever,
            synthesizer,
            lifecycle,
            default_options,
            rejection_message,
        }
    }

    pub async fn process_message(
        &self,
        conversation_id: &str,
        text: &str,
        category: Option<&str>,
    ) -> Result<ProcessedTurn, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        // The closed gate runs before any provider call. A fetch failure
        // treats the conversation as open — the limit check fails open the
        // same way further down.
        let conversation = match self.store.get_conversation(conversation_id).await {
            Ok(Some(c)) => Some(c),
            Ok(None) => {
                return Err(ChatError::ConversationNotFound(conversation_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    error = %e,
                    "Conversation lookup failed, treating as open"
                );
                None
            }
        };

        if conversation
            .as_ref()
            .is_some_and(|c| c.status == ConversationStatus::Closed)
        {
            return Err(ChatError::ConversationClosed);
        }

        let classification = self.classifier.classify(text).await;

        if !classification.supported {
            tracing::info!(conversation_id, "Query classified out of domain");
            return self
                .store_rejection_turn(conversation_id, text, category, conversation)
                .await;
        }

        // In-domain: retrieve and synthesize, both failing closed.
        let sources = self.retriever.get_sources(text, &self.default_options).await?;
        let answer = self
            .synthesizer
            .generate_answer(text, &sources, category)
            .await?;

        let user_metadata = MessageMetadata {
            sources: Vec::new(),
            supported_topic: true,
            category: category.map(|s| s.to_string()),
            device_hint: classification.device_hint.clone(),
        };
        let assistant_metadata = MessageMetadata {
            sources,
            supported_topic: true,
            category: category.map(|s| s.to_string()),
            device_hint: classification.device_hint,
        };

        let user_message = self
            .store
            .create_message(conversation_id, Role::User, text, &user_metadata)
            .await
            .map_err(ChatError::Internal)?;
        let assistant_message = self
            .store
            .create_message(conversation_id, Role::Assistant, &answer, &assistant_metadata)
            .await
            .map_err(ChatError::Internal)?;

        let outcome = self.finalize(conversation_id, conversation).await?;

        Ok(ProcessedTurn {
            user_message,
            assistant_message,
            response: answer,
            out_of_domain: false,
            limit_reached: outcome.limit_reached,
            new_conversation: outcome.new_conversation,
        })
    }

    /// Persist an out-of-domain turn: the user message plus the fixed
    /// rejection reply, flagged in metadata. No provider calls happen on
    /// this path.
    async fn store_rejection_turn(
        &self,
        conversation_id: &str,
        text: &str,
        category: Option<&str>,
        conversation: Option<Conversation>,
    ) -> Result<ProcessedTurn, ChatError> {
        let metadata = MessageMetadata {
            sources: Vec::new(),
            supported_topic: false,
            category: category.map(|s| s.to_string()),
            device_hint: None,
        };

        let user_message = self
            .store
            .create_message(conversation_id, Role::User, text, &metadata)
            .await
            .map_err(ChatError::Internal)?;
        let assistant_message = self
            .store
            .create_message(
                conversation_id,
                Role::Assistant,
                &self.rejection_message,
                &metadata,
            )
            .await
            .map_err(ChatError::Internal)?;

        // Rejection replies still count toward the response limit, so the
        // limit invariant holds across every assistant message.
        let outcome = self.finalize(conversation_id, conversation).await?;

        Ok(ProcessedTurn {
            user_message,
            assistant_message,
            response: self.rejection_message.clone(),
            out_of_domain: true,
            limit_reached: outcome.limit_reached,
            new_conversation: outcome.new_conversation,
        })
    }

    /// Run the lifecycle limit check. Requires the conversation row; if the
    /// earlier lookup failed we re-fetch, and a second failure falls back to
    /// "under limit" (fail open).
    async fn finalize(
        &self,
        conversation_id: &str,
        conversation: Option<Conversation>,
    ) -> Result<crate::lifecycle::TurnOutcome, ChatError> {
        let conversation = match conversation {
            Some(c) => c,
            None => match self.store.get_conversation(conversation_id).await {
                Ok(Some(c)) => c,
                _ => {
                    tracing::warn!(
                        conversation_id,
                        "Conversation unavailable for limit check, skipping"
                    );
                    return Ok(crate::lifecycle::TurnOutcome {
                        limit_reached: false,
                        new_conversation: None,
                    });
                }
            },
        };

        self.lifecycle
            .finalize_turn(&conversation)
            .await
            .map_err(ChatError::Internal)
    }
}
