//! Query expansion at filter creation/edit time: a natural-language
//! intent paragraph for the relevance gate, plus optional related-term
//! suggestions shown back to the user. Pure best-effort — every failure
//! path degrades to a deterministic fallback.

use std::sync::Arc;

use super::{extract_json, render, LlmApi, LlmRequest, EXPAND_PROMPT, INTENT_PROMPT};

pub struct QueryExpander {
    llm: Option<Arc<dyn LlmApi>>,
}

/// The intent used when no LLM is available or the call fails.
pub fn fallback_intent(filter_name: &str, keywords: &[String]) -> String {
    format!(
        "Поиск тендеров по теме: {}. Ключевые слова: {}",
        filter_name,
        keywords.join(", ")
    )
}

impl QueryExpander {
    pub fn new(llm: Option<Arc<dyn LlmApi>>) -> QueryExpander {
        QueryExpander { llm }
    }

    /// Generate the filter's intent paragraph. Called once per
    /// create/edit; the result is persisted on the filter.
    pub async fn generate_intent(
        &self,
        filter_name: &str,
        keywords: &[String],
        exclude_keywords: &[String],
    ) -> String {
        let Some(llm) = self.llm.as_ref() else {
            return fallback_intent(filter_name, keywords);
        };

        let exclude_block = if exclude_keywords.is_empty() {
            String::new()
        } else {
            format!("\nИсключить: {}", exclude_keywords.join(", "))
        };
        let prompt = render(
            INTENT_PROMPT,
            &[
                ("filterName", filter_name),
                ("keywords", &keywords.join(", ")),
                ("excludeBlock", &exclude_block),
            ],
        );

        match llm
            .complete(LlmRequest {
                system: None,
                user: prompt,
                max_tokens: 300,
                temperature: 0.3,
            })
            .await
        {
            Ok(intent) if !intent.trim().is_empty() => {
                tracing::info!(filter = filter_name, "generated filter intent");
                intent.trim().to_string()
            }
            Ok(_) => fallback_intent(filter_name, keywords),
            Err(err) => {
                tracing::error!(error = %err, filter = filter_name, "intent generation failed");
                fallback_intent(filter_name, keywords)
            }
        }
    }

    /// Related search terms to suggest alongside the user's keywords.
    /// Empty on any failure.
    pub async fn suggest_terms(&self, keywords: &[String]) -> Vec<String> {
        let Some(llm) = self.llm.as_ref() else {
            return Vec::new();
        };

        let prompt = render(EXPAND_PROMPT, &[("keywords", &keywords.join(", "))]);
        let reply = match llm
            .complete(LlmRequest {
                system: None,
                user: prompt,
                max_tokens: 1000,
                temperature: 0.3,
            })
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "keyword expansion failed");
                return Vec::new();
            }
        };

        let Some(value) = extract_json(&reply) else {
            return Vec::new();
        };
        let mut terms: Vec<String> = Vec::new();
        for field in ["synonyms", "related_terms"] {
            if let Some(list) = value[field].as_array() {
                for item in list {
                    if let Some(term) = item.as_str() {
                        let term = term.trim().to_string();
                        if !term.is_empty()
                            && !terms.iter().any(|t| t.eq_ignore_ascii_case(&term))
                            && !keywords.iter().any(|k| k.eq_ignore_ascii_case(&term))
                        {
                            terms.push(term);
                        }
                    }
                }
            }
        }
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_intent_names_the_filter() {
        let intent = fallback_intent(
            "IT оборудование",
            &["компьютер".into(), "сервер".into()],
        );
        assert!(intent.contains("IT оборудование"));
        assert!(intent.contains("компьютер, сервер"));
    }

    #[tokio::test]
    async fn no_backend_means_fallback_intent_and_no_terms() {
        let expander = QueryExpander::new(None);
        let intent = expander
            .generate_intent("Linux", &["linux".into()], &[])
            .await;
        assert!(intent.starts_with("Поиск тендеров по теме: Linux"));
        assert!(expander.suggest_terms(&["linux".into()]).await.is_empty());
    }
}
