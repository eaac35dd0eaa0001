//! Source retriever: cache-fronted access to the web search provider.
//!
//! A cache hit returns the previously fetched, already-shaped source list
//! without a network call. A miss performs the retrieval, stores the
//! shaped result under the TTL, and returns it. Zero results is a valid
//! outcome — downstream answers without grounding and says so.

use std::sync::Arc;

use crate::cache::SourceCache;
use crate::models::SourceDocument;
use crate::websearch::{SearchError, SearchOptions, SearchProvider};

pub struct SourceRetriever {
    provider: Arc<dyn SearchProvider>,
    cache: Arc<SourceCache>,
}

impl SourceRetriever {
    pub fn new(provider: Arc<dyn SearchProvider>, cache: Arc<SourceCache>) -> Self {
        Self { provider, cache }
    }

    pub async fn get_sources(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SourceDocument>, SearchError> {
        let key = SourceCache::key(query, options);

        if let Some(sources) = self.cache.get(&key) {
            tracing::debug!(query, "Source cache hit");
            return Ok(sources);
        }

        let sources = self.provider.search(query, options).await?;
        tracing::debug!(query, count = sources.len(), "Fetched sources from provider");

        self.cache.set(key, sources.clone());
        Ok(sources)
    }
}
