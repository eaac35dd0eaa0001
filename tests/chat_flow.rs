//! End-to-end chat turn processing against a temporary database, with
//! fake providers injected through the adapter traits.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use deskline::cache::SourceCache;
use deskline::chat::{ChatError, ChatService};
use deskline::classifier::DomainClassifier;
use deskline::config::{ChatConfig, Config, DbConfig, ServerConfig};
use deskline::lifecycle::LifecycleManager;
use deskline::llm::{LanguageModel, LlmError};
use deskline::models::{ConversationStatus, MessageMetadata, Role, SourceDocument};
use deskline::store::Store;
use deskline::retriever::SourceRetriever;
use deskline::synthesizer::AnswerSynthesizer;
use deskline::websearch::{SearchError, SearchOptions, SearchProvider};
use deskline::{db, migrate};

const REJECTION: &str = "I can only help with IT support questions.";

const CANNED_ANSWER: &str = "## Blue Screen Fixes\n\n1. Update your drivers [Source 1].\n2. Run a memory check [Source 1].\n\nSources\n[Source 1]";

/// Fake language model: answers classification prompts with a fixed
/// verdict and counts non-classification (synthesis) calls separately.
struct FakeModel {
    classify_verdict: &'static str,
    synthesis_calls: AtomicUsize,
    fail_synthesis: bool,
}

impl FakeModel {
    fn new(classify_verdict: &'static str) -> Self {
        Self {
            classify_verdict,
            synthesis_calls: AtomicUsize::new(0),
            fail_synthesis: false,
        }
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("topic classifier") {
            return Ok(self.classify_verdict.to_string());
        }
        self.synthesis_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesis {
            return Err(LlmError::Transient("model unavailable".to_string()));
        }
        Ok(CANNED_ANSWER.to_string())
    }
}

/// Fake search provider: counts calls; optionally empty or failing.
struct FakeSearch {
    calls: AtomicUsize,
    empty: bool,
    fail: bool,
}

impl FakeSearch {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            empty: false,
            fail: false,
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(
        &self,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SearchError::new("provider down"));
        }
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![SourceDocument {
            title: format!("Guide: {}", query),
            url: "https://support.example.com/guide".to_string(),
            excerpt: "Step-by-step troubleshooting guide.".to_string(),
            score: 0.92,
            published_at: Some("2025-03-14".to_string()),
        }])
    }
}

struct TestEnv {
    _tmp: TempDir,
    store: Store,
    chat: ChatService,
    model: Arc<FakeModel>,
    search: Arc<FakeSearch>,
}

fn test_config(db_path: PathBuf) -> Config {
    Config {
        db: DbConfig { path: db_path },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            admin_token: None,
        },
        chat: ChatConfig::default(),
        search: Default::default(),
        llm: Default::default(),
        articles: Default::default(),
    }
}

async fn setup_with(
    response_limit: i64,
    model: FakeModel,
    search: FakeSearch,
) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path().join("deskline.sqlite"));

    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    let store = Store::new(pool);

    let model = Arc::new(model);
    let search = Arc::new(search);
    let cache = Arc::new(SourceCache::new(100, Duration::from_secs(3600)));

    let model_dyn: Arc<dyn LanguageModel> = model.clone();
    let search_dyn: Arc<dyn SearchProvider> = search.clone();

    let chat = ChatService::new(
        store.clone(),
        DomainClassifier::new(model_dyn.clone()),
        SourceRetriever::new(search_dyn, cache),
        AnswerSynthesizer::new(model_dyn),
        LifecycleManager::new(store.clone(), response_limit),
        SearchOptions::from_config(&config.search),
        REJECTION.to_string(),
    );

    TestEnv {
        _tmp: tmp,
        store,
        chat,
        model,
        search,
    }
}

async fn setup(response_limit: i64) -> TestEnv {
    setup_with(response_limit, FakeModel::new("NO"), FakeSearch::new()).await
}

async fn new_conversation(env: &TestEnv) -> String {
    let user = env.store.create_user("user@example.com", None).await.unwrap();
    let conversation = env
        .store
        .create_conversation(&user.id, Some("Support"))
        .await
        .unwrap();
    conversation.id
}

#[tokio::test]
async fn test_in_domain_turn_stores_ordered_pair_with_citations() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let turn = env
        .chat
        .process_message(
            &conversation_id,
            "How do I fix a blue screen error on Windows?",
            None,
        )
        .await
        .unwrap();

    assert!(!turn.out_of_domain);
    assert!(turn.response.contains("[Source"));
    assert!(!turn.limit_reached);

    let messages = env.store.list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[0].conversation_id, conversation_id);
    assert_eq!(messages[1].conversation_id, conversation_id);

    assert!(messages[1].metadata.supported_topic);
    assert_eq!(messages[1].metadata.sources.len(), 1);
    assert_eq!(
        messages[1].metadata.sources[0].url,
        "https://support.example.com/guide"
    );
}

#[tokio::test]
async fn test_out_of_domain_makes_no_provider_calls() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let turn = env
        .chat
        .process_message(&conversation_id, "What's the capital of France?", None)
        .await
        .unwrap();

    assert!(turn.out_of_domain);
    assert_eq!(turn.response, REJECTION);
    assert_eq!(env.search.calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.model.synthesis_calls.load(Ordering::SeqCst), 0);

    let messages = env.store.list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].metadata.supported_topic);
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let err = env
        .chat
        .process_message(&conversation_id, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
}

#[tokio::test]
async fn test_unknown_conversation_rejected() {
    let env = setup(10).await;
    let err = env
        .chat
        .process_message("no-such-id", "printer offline", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound(_)));
}

#[tokio::test]
async fn test_closed_conversation_rejected_before_any_provider_call() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;
    env.store
        .set_conversation_status(&conversation_id, ConversationStatus::Closed)
        .await
        .unwrap();

    let err = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::ConversationClosed));
    assert_eq!(env.search.calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.model.synthesis_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_limit_reached_closes_and_rotates() {
    let env = setup(2).await;
    let conversation_id = new_conversation(&env).await;

    let first = env
        .chat
        .process_message(&conversation_id, "My wifi keeps dropping", None)
        .await
        .unwrap();
    assert!(!first.limit_reached);
    assert!(first.new_conversation.is_none());

    let second = env
        .chat
        .process_message(&conversation_id, "Now the printer is offline too", None)
        .await
        .unwrap();
    assert!(second.limit_reached);

    // Both halves of the boundary turn were stored before the check.
    let messages = env.store.list_messages(&conversation_id).await.unwrap();
    assert_eq!(messages.len(), 4);

    // The old conversation is closed...
    let old = env
        .store
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, ConversationStatus::Closed);

    // ...one summary row exists, derived from the first user message...
    let summaries = env.store.list_summaries_for_user(&old.user_id).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].conversation_id, conversation_id);
    assert_eq!(summaries[0].summary, "My wifi keeps dropping");

    // ...and the successor is active, same user, returned to the caller.
    let successor = second.new_conversation.unwrap();
    assert_eq!(successor.user_id, old.user_id);
    let stored = env
        .store
        .get_conversation(&successor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConversationStatus::Active);

    // Posting into the closed conversation is rejected.
    let err = env
        .chat
        .process_message(&conversation_id, "one more thing", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ConversationClosed));

    // Invariant: assistant count <= limit OR closed.
    let count = env
        .store
        .count_assistant_messages(&conversation_id)
        .await
        .unwrap();
    assert!(count <= 2 || old.status == ConversationStatus::Closed);
}

#[tokio::test]
async fn test_rotation_summary_truncates_long_first_message() {
    let env = setup(1).await;
    let conversation_id = new_conversation(&env).await;

    let long_message =
        "My computer has been making a strange clicking noise every time it boots up since Monday";
    let turn = env
        .chat
        .process_message(&conversation_id, long_message, None)
        .await
        .unwrap();
    assert!(turn.limit_reached);

    let old = env
        .store
        .get_conversation(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    let summaries = env.store.list_summaries_for_user(&old.user_id).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].summary.ends_with("..."));
    assert_eq!(summaries[0].summary.chars().count(), 53);
    assert!(long_message.starts_with(summaries[0].summary.trim_end_matches("...")));
}

#[tokio::test]
async fn test_repeat_query_hits_cache_once() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let first = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap();
    let second = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap();

    assert_eq!(env.search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        first.assistant_message.metadata.sources,
        second.assistant_message.metadata.sources
    );
}

#[tokio::test]
async fn test_zero_sources_is_not_an_error() {
    let mut search = FakeSearch::new();
    search.empty = true;
    let env = setup_with(10, FakeModel::new("NO"), search).await;
    let conversation_id = new_conversation(&env).await;

    let turn = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap();

    assert!(!turn.out_of_domain);
    assert!(turn.assistant_message.metadata.sources.is_empty());
    assert_eq!(env.model.synthesis_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retrieval_failure_fails_closed_and_stores_nothing() {
    let mut search = FakeSearch::new();
    search.fail = true;
    let env = setup_with(10, FakeModel::new("NO"), search).await;
    let conversation_id = new_conversation(&env).await;

    let err = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Retrieval(_)));

    let messages = env.store.list_messages(&conversation_id).await.unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_generation_failure_fails_closed_and_stores_nothing() {
    let mut model = FakeModel::new("NO");
    model.fail_synthesis = true;
    let env = setup_with(10, model, FakeSearch::new()).await;
    let conversation_id = new_conversation(&env).await;

    let err = env
        .chat
        .process_message(&conversation_id, "printer offline", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Generation(LlmError::Transient(_))));

    let messages = env.store.list_messages(&conversation_id).await.unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_message_metadata_roundtrip() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let metadata = MessageMetadata {
        sources: vec![
            SourceDocument {
                title: "Guide one".to_string(),
                url: "https://a.example/one".to_string(),
                excerpt: "First excerpt".to_string(),
                score: 0.9,
                published_at: None,
            },
            SourceDocument {
                title: "Guide two".to_string(),
                url: "https://b.example/two".to_string(),
                excerpt: "Second excerpt".to_string(),
                score: 0.5,
                published_at: Some("2024-01-01".to_string()),
            },
        ],
        supported_topic: true,
        category: Some("network".to_string()),
        device_hint: Some("Dell".to_string()),
    };

    let created = env
        .store
        .create_message(&conversation_id, Role::Assistant, "answer", &metadata)
        .await
        .unwrap();

    let fetched = env.store.get_message(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched.metadata, metadata);
    assert_eq!(fetched.metadata.sources.len(), 2);
    for (stored, original) in fetched.metadata.sources.iter().zip(metadata.sources.iter()) {
        assert_eq!(stored.title, original.title);
        assert_eq!(stored.url, original.url);
    }
}

#[tokio::test]
async fn test_device_hint_recorded_in_metadata() {
    let env = setup(10).await;
    let conversation_id = new_conversation(&env).await;

    let turn = env
        .chat
        .process_message(
            &conversation_id,
            "My MacBook won't connect to wifi",
            Some("network"),
        )
        .await
        .unwrap();

    assert_eq!(
        turn.assistant_message.metadata.device_hint.as_deref(),
        Some("MacBook")
    );
    assert_eq!(
        turn.assistant_message.metadata.category.as_deref(),
        Some("network")
    );
}
