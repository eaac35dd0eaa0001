//! HTTP JSON API server.
//!
//! Exposes the chat pipeline, conversation/message CRUD, the two-step
//! retrieval/synthesis endpoints, article generation, and the ticketing
//! sub-app over a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/users` | Create a user |
//! | `POST` | `/conversations` | Create a conversation |
//! | `GET`  | `/conversations/{id}` | Fetch a conversation |
//! | `GET`  | `/conversations/{id}/messages` | Ordered message list |
//! | `GET`  | `/users/{id}/conversations` | Conversations for a user |
//! | `POST` | `/messages/process` | Process one chat turn |
//! | `POST` | `/messages/{id}/feedback` | Rate an assistant message |
//! | `POST` | `/ai/sources` | Retrieval step only |
//! | `POST` | `/ai/generate` | Synthesis step only |
//! | `POST` | `/articles/generate` | Admin: batch-generate KB articles |
//! | `GET`  | `/articles` | List KB articles |
//! | `POST` | `/problems` | Report a problem |
//! | `GET`  | `/problems` | List problems |
//! | `GET`  | `/problems/{id}` | Fetch a problem |
//! | `POST` | `/problems/{id}/solutions` | Add a solution |
//! | `GET`  | `/problems/{id}/solutions` | List solutions |
//! | `PUT`  | `/solutions/{id}/rating` | Rate a solution |
//!
//! # Error Contract
//!
//! All error responses follow one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `forbidden` /
//! `conversation_closed` / `out_of_domain` / `safety_blocked` (403),
//! `quota_exceeded` (429), `bad_upstream` (502), `internal` (500).
//! Status mapping switches on the typed error variants from the chat and
//! provider layers — no message-text sniffing.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::articles::{self, ArticleGenerator};
use crate::cache::SourceCache;
use crate::chat::{ChatError, ChatService, ProcessedTurn};
use crate::classifier::DomainClassifier;
use crate::config::Config;
use crate::db;
use crate::lifecycle::LifecycleManager;
use crate::llm::{GeminiClient, LlmError};
use crate::models::{Conversation, Message, SourceDocument};
use crate::retriever::SourceRetriever;
use crate::store::Store;
use crate::synthesizer::AnswerSynthesizer;
use crate::websearch::{SearchOptions, TavilyClient};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Store,
    chat: Arc<ChatService>,
    retriever: Arc<SourceRetriever>,
    synthesizer: Arc<AnswerSynthesizer>,
    articles: Arc<ArticleGenerator>,
}

/// Starts the HTTP server.
///
/// Constructs the provider clients, cache, and chat pipeline from
/// configuration, registers all route handlers, and serves until the
/// process is terminated. Requires `GEMINI_API_KEY` and `TAVILY_API_KEY`
/// in the environment.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let pool = db::connect(&config).await?;
    let store = Store::new(pool);

    let model: Arc<dyn crate::llm::LanguageModel> = Arc::new(GeminiClient::new(&config.llm)?);
    let search: Arc<dyn crate::websearch::SearchProvider> =
        Arc::new(TavilyClient::new(&config.search)?);

    let cache = Arc::new(SourceCache::new(
        config.search.cache_capacity,
        Duration::from_secs(config.search.cache_ttl_secs),
    ));

    let retriever = Arc::new(SourceRetriever::new(search.clone(), cache.clone()));
    let synthesizer = Arc::new(AnswerSynthesizer::new(model.clone()));
    let article_generator = Arc::new(ArticleGenerator::new(store.clone(), model.clone()));

    let chat = Arc::new(ChatService::new(
        store.clone(),
        DomainClassifier::new(model.clone()),
        SourceRetriever::new(search, cache),
        AnswerSynthesizer::new(model),
        LifecycleManager::new(store.clone(), config.chat.response_limit),
        SearchOptions::from_config(&config.search),
        config.chat.rejection_message.clone(),
    ));

    if config.articles.schedule_enabled {
        articles::spawn_schedule(
            article_generator.clone(),
            config.articles.interval_hours,
            config.articles.daily_count,
        );
        tracing::info!(
            interval_hours = config.articles.interval_hours,
            "Article schedule enabled"
        );
    }

    let state = AppState {
        config,
        store,
        chat,
        retriever,
        synthesizer,
        articles: article_generator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/users", post(handle_create_user))
        .route("/users/{id}/conversations", get(handle_list_conversations))
        .route("/conversations", post(handle_create_conversation))
        .route("/conversations/{id}", get(handle_get_conversation))
        .route("/conversations/{id}/messages", get(handle_list_messages))
        .route("/messages/process", post(handle_process_message))
        .route("/messages/{id}/feedback", post(handle_create_feedback))
        .route("/ai/sources", post(handle_ai_sources))
        .route("/ai/generate", post(handle_ai_generate))
        .route("/articles/generate", post(handle_generate_articles))
        .route("/articles", get(handle_list_articles))
        .route("/problems", post(handle_create_problem).get(handle_list_problems))
        .route("/problems/{id}", get(handle_get_problem))
        .route(
            "/problems/{id}/solutions",
            post(handle_create_solution).get(handle_list_solutions),
        )
        .route("/solutions/{id}/rating", put(handle_rate_solution))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "Deskline server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn forbidden(code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: code.to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map typed chat/provider errors onto HTTP statuses. Variant-driven:
/// quota → 429, safety → 403, malformed upstream → 502, policy → 403.
fn classify_chat_error(err: ChatError) -> AppError {
    match err {
        ChatError::EmptyMessage => bad_request("message must not be empty"),
        ChatError::ConversationNotFound(id) => not_found(format!("conversation not found: {}", id)),
        ChatError::ConversationClosed => forbidden(
            "conversation_closed",
            "conversation is closed, start a new conversation",
        ),
        ChatError::Retrieval(e) => {
            tracing::error!(error = %e, "Source retrieval failed");
            internal(e.to_string())
        }
        ChatError::Generation(e) => classify_llm_error(e),
        ChatError::Internal(e) => {
            tracing::error!(error = %e, "Chat turn failed");
            internal(e.to_string())
        }
    }
}

fn classify_llm_error(err: LlmError) -> AppError {
    match err {
        LlmError::QuotaExceeded => AppError {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "quota_exceeded".to_string(),
            message: "generation quota exceeded, try again later".to_string(),
        },
        LlmError::SafetyBlocked(reason) => forbidden(
            "safety_blocked",
            format!("request blocked by safety policy: {}", reason),
        ),
        LlmError::MalformedResponse(detail) => AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "bad_upstream".to_string(),
            message: format!("malformed provider response: {}", detail),
        },
        LlmError::Transient(detail) | LlmError::Unknown(detail) => internal(detail),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Users ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    email: String,
    #[serde(default)]
    display_name: Option<String>,
}

async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.email.trim().is_empty() {
        return Err(bad_request("email must not be empty"));
    }

    let user = state
        .store
        .create_user(req.email.trim(), req.display_name.as_deref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(user)))
}

// ============ Conversations ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    user_id: String,
    #[serde(default)]
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(bad_request("userId must not be empty"));
    }

    let user = state
        .store
        .get_user(&req.user_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if user.is_none() {
        return Err(not_found(format!("user not found: {}", req.user_id)));
    }

    let conversation = state
        .store
        .create_conversation(&req.user_id, req.title.as_deref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, AppError> {
    state
        .store
        .get_conversation(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| not_found(format!("conversation not found: {}", id)))
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    let conversations = state
        .store
        .list_conversations_for_user(&user_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(conversations))
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let conversation = state
        .store
        .get_conversation(&id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if conversation.is_none() {
        return Err(not_found(format!("conversation not found: {}", id)));
    }

    let messages = state
        .store
        .list_messages(&id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(messages))
}

// ============ POST /messages/process ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessMessageRequest {
    #[serde(default)]
    message: String,
    conversation_id: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessMessageResponse {
    user_message: Message,
    assistant_message: Message,
    response: String,
    out_of_domain: bool,
    limit_reached: bool,
    new_conversation: Option<Conversation>,
}

impl From<ProcessedTurn> for ProcessMessageResponse {
    fn from(turn: ProcessedTurn) -> Self {
        Self {
            user_message: turn.user_message,
            assistant_message: turn.assistant_message,
            response: turn.response,
            out_of_domain: turn.out_of_domain,
            limit_reached: turn.limit_reached,
            new_conversation: turn.new_conversation,
        }
    }
}

/// Handler for `POST /messages/process`.
///
/// Runs the full turn pipeline. An out-of-domain turn is persisted like
/// any other but answers `403` with the stored rejection so the client
/// knows to start over; `limitReached` + `newConversation` tell the client
/// when a rotation happened.
async fn handle_process_message(
    State(state): State<AppState>,
    Json(req): Json<ProcessMessageRequest>,
) -> Result<Response, AppError> {
    if req.conversation_id.trim().is_empty() {
        return Err(bad_request("conversationId must not be empty"));
    }

    let turn = state
        .chat
        .process_message(&req.conversation_id, &req.message, req.category.as_deref())
        .await
        .map_err(classify_chat_error)?;

    let status = if turn.out_of_domain {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::OK
    };

    Ok((status, Json(ProcessMessageResponse::from(turn))).into_response())
}

// ============ Feedback ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackRequest {
    rating: i64,
    #[serde(default)]
    comment: Option<String>,
}

async fn handle_create_feedback(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !(1..=5).contains(&req.rating) {
        return Err(bad_request("rating must be between 1 and 5"));
    }

    let message = state
        .store
        .get_message(&message_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if message.is_none() {
        return Err(not_found(format!("message not found: {}", message_id)));
    }

    let feedback = state
        .store
        .create_feedback(&message_id, req.rating, req.comment.as_deref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(feedback)))
}

// ============ POST /ai/sources ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourcesRequest {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    search_depth: Option<String>,
    #[serde(default)]
    include_domains: Option<Vec<String>>,
    #[serde(default)]
    exclude_domains: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceDocument>,
}

/// Handler for `POST /ai/sources`.
///
/// Exposes the retrieval step directly for clients that want to inspect
/// sources before generating an answer. Per-request option overrides are
/// applied on top of the configured defaults.
async fn handle_ai_sources(
    State(state): State<AppState>,
    Json(req): Json<SourcesRequest>,
) -> Result<Json<SourcesResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mut options = SearchOptions::from_config(&state.config.search);
    if let Some(n) = req.max_results {
        options.max_results = n;
    }
    if let Some(depth) = req.search_depth {
        match depth.as_str() {
            "basic" | "advanced" => options.search_depth = depth,
            other => {
                return Err(bad_request(format!(
                    "unknown search depth: {}. Use basic or advanced.",
                    other
                )))
            }
        }
    }
    if let Some(domains) = req.include_domains {
        options.include_domains = domains;
    }
    if let Some(domains) = req.exclude_domains {
        options.exclude_domains = domains;
    }

    let sources = state
        .retriever
        .get_sources(req.query.trim(), &options)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(SourcesResponse { sources }))
}

// ============ POST /ai/generate ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    query: String,
    #[serde(default)]
    sources: Vec<SourceDocument>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    answer: String,
}

/// Handler for `POST /ai/generate`.
///
/// Exposes the synthesis step directly, taking sources previously fetched
/// via `POST /ai/sources` (or none, for an ungrounded answer).
async fn handle_ai_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let answer = state
        .synthesizer
        .generate_answer(req.query.trim(), &req.sources, req.category.as_deref())
        .await
        .map_err(classify_llm_error)?;

    Ok(Json(GenerateResponse { answer }))
}

// ============ Articles ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateArticlesRequest {
    #[serde(default)]
    count: Option<usize>,
}

/// Handler for `POST /articles/generate`.
///
/// Admin-only: requires `Authorization: Bearer <token>` matching
/// `[server].admin_token`. Disabled entirely when no token is configured.
async fn handle_generate_articles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateArticlesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let expected = state
        .config
        .server
        .admin_token
        .as_deref()
        .ok_or_else(|| forbidden("forbidden", "article generation is not enabled"))?;

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided != Some(expected) {
        return Err(forbidden("forbidden", "invalid admin token"));
    }

    let count = req.count.unwrap_or(state.config.articles.daily_count);
    if count < 1 {
        return Err(bad_request("count must be >= 1"));
    }

    let generated = state
        .articles
        .generate_batch(count)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(generated)))
}

async fn handle_list_articles(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let articles = state
        .store
        .list_articles()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(articles))
}

// ============ Problems & solutions ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProblemRequest {
    user_id: String,
    title: String,
    description: String,
}

async fn handle_create_problem(
    State(state): State<AppState>,
    Json(req): Json<CreateProblemRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.user_id.trim().is_empty() || req.title.trim().is_empty() {
        return Err(bad_request("userId and title must not be empty"));
    }

    let problem = state
        .store
        .create_problem(&req.user_id, req.title.trim(), &req.description)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(problem)))
}

async fn handle_list_problems(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let problems = state
        .store
        .list_problems()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(problems))
}

async fn handle_get_problem(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .store
        .get_problem(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| not_found(format!("problem not found: {}", id)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSolutionRequest {
    user_id: String,
    content: String,
    #[serde(default)]
    ai_generated: bool,
}

async fn handle_create_solution(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
    Json(req): Json<CreateSolutionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let problem = state
        .store
        .get_problem(&problem_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if problem.is_none() {
        return Err(not_found(format!("problem not found: {}", problem_id)));
    }

    let solution = state
        .store
        .create_solution(&problem_id, &req.user_id, &req.content, req.ai_generated)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(solution)))
}

async fn handle_list_solutions(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let solutions = state
        .store
        .list_solutions(&problem_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(solutions))
}

#[derive(Deserialize)]
struct RateSolutionRequest {
    rating: i64,
}

async fn handle_rate_solution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RateSolutionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !(1..=5).contains(&req.rating) {
        return Err(bad_request("rating must be between 1 and 5"));
    }

    let updated = state
        .store
        .rate_solution(&id, req.rating)
        .await
        .map_err(|e| internal(e.to_string()))?;

    if !updated {
        return Err(not_found(format!("solution not found: {}", id)));
    }

    Ok(StatusCode::NO_CONTENT)
}
