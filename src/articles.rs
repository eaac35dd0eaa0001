//! Knowledge-base article generation.
//!
//! Batch flow: one model call proposes N article topics, then each topic
//! gets its own long-form generation call and is persisted. Invoked from
//! the admin endpoint and, when enabled, from an in-process interval
//! schedule started alongside the server.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::LanguageModel;
use crate::models::Article;
use crate::store::Store;

const TOPICS_PROMPT: &str = "Propose {count} concise knowledge-base article \
topics for an IT support site, covering common hardware, software, network, \
and security problems. Return one topic per line, no numbering.";

const ARTICLE_PROMPT: &str = "Write a knowledge-base article for an IT \
support site on the topic below. Start with a one-line title on the first \
line, then the article body with a short introduction, numbered steps, and \
a prevention section.\n\nTopic: ";

pub struct ArticleGenerator {
    store: Store,
    model: Arc<dyn LanguageModel>,
}

impl ArticleGenerator {
    pub fn new(store: Store, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    /// Generate and persist up to `count` articles. A failed topic is
    /// logged and skipped; the batch continues with the rest.
    pub async fn generate_batch(&self, count: usize) -> Result<Vec<Article>> {
        let topics_prompt = TOPICS_PROMPT.replace("{count}", &count.to_string());
        let raw = self
            .model
            .generate(&topics_prompt)
            .await
            .map_err(|e| anyhow::anyhow!("topic generation failed: {}", e))?;

        let topics = parse_topics(&raw, count);
        if topics.is_empty() {
            anyhow::bail!("topic generation produced no usable topics");
        }

        let mut articles = Vec::with_capacity(topics.len());

        for topic in &topics {
            match self.generate_one(topic).await {
                Ok(article) => articles.push(article),
                Err(e) => {
                    tracing::warn!(topic, error = %e, "Article generation failed, skipping topic");
                }
            }
        }

        tracing::info!(
            requested = count,
            generated = articles.len(),
            "Article batch complete"
        );
        Ok(articles)
    }

    async fn generate_one(&self, topic: &str) -> Result<Article> {
        let prompt = format!("{}{}", ARTICLE_PROMPT, topic);
        let body = self
            .model
            .generate(&prompt)
            .await
            .map_err(|e| anyhow::anyhow!("article generation failed: {}", e))?;

        let (title, content) = split_title(&body, topic);
        self.store
            .create_article(topic, &title, &content, None)
            .await
    }
}

/// Parse model output into topic lines: strip list markers, drop blanks,
/// cap at the requested count.
fn parse_topics(text: &str, count: usize) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim_start_matches(['-', '*'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(count)
        .collect()
}

/// First non-empty line is the title, remainder is the body. A bodyless
/// response falls back to the topic as title.
fn split_title(body: &str, topic: &str) -> (String, String) {
    let mut lines = body.trim().lines();
    match lines.next() {
        Some(first) => {
            let title = first.trim_start_matches('#').trim().to_string();
            let rest: String = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            if rest.is_empty() {
                (topic.to_string(), body.trim().to_string())
            } else {
                (title, rest)
            }
        }
        None => (topic.to_string(), body.to_string()),
    }
}

/// Spawn the interval schedule for batch generation. The first tick fires
/// after one full interval, not at startup.
pub fn spawn_schedule(generator: Arc<ArticleGenerator>, interval_hours: u64, count: usize) {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_hours * 3600);
        let mut ticker = tokio::time::interval(period);
        // Consume the immediate first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = generator.generate_batch(count).await {
                tracing::error!(error = %e, "Scheduled article batch failed");
            }
        }
    });
}
