//! Answer synthesizer: builds a grounded prompt from the query and
//! retrieved sources, then invokes the language model.
//!
//! The output is opaque formatted text — the synthesizer never parses or
//! validates the model's structure. Provider failures re-raise as typed
//! [`LlmError`]s; the HTTP layer decides what each variant means to the
//! client (see DESIGN.md for the policy decision).

use std::sync::Arc;

use crate::llm::{LanguageModel, LlmError};
use crate::models::SourceDocument;

/// Per-source excerpt cap applied when rendering sources into the prompt.
const EXCERPT_CAP: usize = 800;

const PERSONA: &str = "You are an experienced IT support specialist helping \
end users resolve hardware, software, network, and security problems. Be \
practical and concrete. Format your answer with a short heading, numbered \
troubleshooting steps, and a closing \"Sources\" section.";

const CITE_INSTRUCTION: &str = "Ground your answer in the sources below and \
cite them inline as [Source N] wherever you rely on one.";

const NO_SOURCES_INSTRUCTION: &str = "No specific sources are available for \
this question. Answer from general best practice, and tell the user that no \
specific sources were found.";

/// Category-specific guidance, keyed by an optional category argument.
/// Unmatched or absent categories fall back to the generic instruction.
fn category_guidance(category: Option<&str>) -> &'static str {
    match category {
        Some("hardware") => {
            "Focus on physical checks first: cables, power, seating, \
             indicator lights, and device-specific diagnostics."
        }
        Some("software") => {
            "Walk through version checks, clean reinstalls, and \
             configuration resets before suggesting workarounds."
        }
        Some("network") => {
            "Diagnose from the inside out: adapter state, local \
             connectivity, DNS, then upstream. Include the commands to run."
        }
        Some("security") => {
            "Treat the machine as potentially compromised. Prioritize \
             containment steps and credential hygiene before cleanup."
        }
        Some("troubleshooting") => {
            "Use a systematic elimination approach and ask the user to \
             note what changes after each step."
        }
        _ => "Give general troubleshooting guidance appropriate to the problem.",
    }
}

/// Render the sources section: enumerated, excerpt-capped entries the
/// citation instruction refers to by index.
fn render_sources(sources: &[SourceDocument]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        let excerpt: String = source.excerpt.chars().take(EXCERPT_CAP).collect();
        out.push_str(&format!(
            "Source {}: {} ({})\n{}\n\n",
            i + 1,
            source.title,
            source.url,
            excerpt
        ));
    }
    out
}

/// Assemble the full synthesis prompt.
pub fn build_prompt(query: &str, sources: &[SourceDocument], category: Option<&str>) -> String {
    let guidance = category_guidance(category);

    if sources.is_empty() {
        return format!(
            "{}\n\n{}\n\n{}\n\nQuestion: {}",
            PERSONA, guidance, NO_SOURCES_INSTRUCTION, query
        );
    }

    format!(
        "{}\n\n{}\n\n{}\n\n{}Question: {}",
        PERSONA,
        guidance,
        CITE_INSTRUCTION,
        render_sources(sources),
        query
    )
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn generate_answer(
        &self,
        query: &str,
        sources: &[SourceDocument],
        category: Option<&str>,
    ) -> Result<String, LlmError> {
        let prompt = build_prompt(query, sources, category);
        self.model.generate(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str, excerpt: &str) -> SourceDocument {
        SourceDocument {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            excerpt: excerpt.to_string(),
            score: 0.7,
            published_at: None,
        }
    }

    #[test]
    fn test_prompt_enumerates_sources_and_requires_citations() {
        let sources = vec![source("a", "first"), source("b", "second")];
        let prompt = build_prompt("printer offline", &sources, None);

        assert!(prompt.contains("[Source N]"));
        assert!(prompt.contains("Source 1: a"));
        assert!(prompt.contains("Source 2: b"));
        assert!(prompt.contains("Question: printer offline"));
    }

    #[test]
    fn test_prompt_caps_excerpt_length() {
        let long_excerpt = "x".repeat(2000);
        let sources = vec![source("a", &long_excerpt)];
        let prompt = build_prompt("q", &sources, None);

        let rendered_xs = prompt.chars().filter(|c| *c == 'x').count();
        assert_eq!(rendered_xs, EXCERPT_CAP);
    }

    #[test]
    fn test_prompt_without_sources_says_so() {
        let prompt = build_prompt("printer offline", &[], None);

        assert!(prompt.contains("No specific sources are available"));
        assert!(!prompt.contains("[Source N]"));
    }

    #[test]
    fn test_category_guidance_selection() {
        let network = build_prompt("q", &[], Some("network"));
        assert!(network.contains("DNS"));

        let security = build_prompt("q", &[], Some("security"));
        assert!(security.contains("containment"));

        // Unmatched category falls back to the generic instruction.
        let unknown = build_prompt("q", &[], Some("astrology"));
        assert!(unknown.contains("general troubleshooting guidance"));

        let absent = build_prompt("q", &[], None);
        assert!(absent.contains("general troubleshooting guidance"));
    }
}
