//! # Deskline
//!
//! A retrieval-augmented IT support chat backend.
//!
//! Deskline answers end-user support questions by retrieving web sources
//! through a search provider, synthesizing a cited answer with a
//! generative language model, and tracking each conversation's lifecycle
//! in a relational store — closing a conversation once it reaches its
//! response limit and seamlessly opening a successor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌─────────────┐
//! │  HTTP    │──▶│ Classifier  │──▶│ Retriever │──▶│ Synthesizer │
//! │  (axum)  │   │  (gate)    │   │ (+cache)  │   │  (grounded) │
//! └────┬─────┘   └────────────┘   └───────────┘   └──────┬──────┘
//!      │                                                  │
//!      ▼                                                  ▼
//! ┌──────────┐                                     ┌─────────────┐
//! │  SQLite  │◀────────────────────────────────────│  Lifecycle  │
//! │  (sqlx)  │                                     │ (limit/rotate)│
//! └──────────┘                                     └─────────────┘
//! ```
//!
//! ## Turn flow
//!
//! inbound message → domain gate → source retrieval (cache-checked) →
//! answer synthesis → persist both turn halves → limit check / rotation →
//! response.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Persisted entities and metadata shapes |
//! | [`store`] | Persistence gateway (typed CRUD) |
//! | [`llm`] | Generative language model adapter |
//! | [`websearch`] | Web search provider adapter |
//! | [`cache`] | Bounded TTL cache over retrieval results |
//! | [`classifier`] | Supported-topic gate + device hints |
//! | [`retriever`] | Cache-fronted source retrieval |
//! | [`synthesizer`] | Grounded prompt construction + generation |
//! | [`lifecycle`] | Response limit, close, and rotation |
//! | [`chat`] | Turn orchestration |
//! | [`articles`] | Knowledge-base article batches |
//! | [`server`] | HTTP JSON API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod articles;
pub mod cache;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod server;
pub mod store;
pub mod synthesizer;
pub mod websearch;
