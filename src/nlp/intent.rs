use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CachedResponse, Fingerprint, OperationKind, ResponseCache};
use crate::llm::models::IntentReply;
use crate::llm::{strip_code_fence, CompletionOutcome, CompletionRequest, LlmManager};
use crate::nlp::prompts::{intent_user_prompt, INTENT_SYSTEM_PROMPT};
use crate::nlp::{IntentType, QueryIntent};

const RETRIEVAL_WORDS: &[&str] = &["show", "select", "get"];
const AGGREGATION_WORDS: &[&str] = &["count", "sum", "average"];
const FILTER_WORDS: &[&str] = &["filter", "where", "find"];

pub struct IntentClassifier {
    llm: Arc<LlmManager>,
    cache: Arc<ResponseCache>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<LlmManager>, cache: Arc<ResponseCache>) -> Self {
        Self { llm, cache }
    }

    /// Never fails: any unusable completion falls back to the keyword heuristic. Only
    /// answers parsed from a completed call are cached.
    pub async fn classify(&self, text: &str) -> QueryIntent {
        let key = Fingerprint::new(OperationKind::Intent, text, None, "");
        if let Some(CachedResponse::Intent(intent)) = self.cache.get(&key).await {
            return intent;
        }

        match self.classify_remote(text).await {
            Some(intent) => {
                info!("Intent classified as {} ({:.2})", intent.intent_type, intent.confidence);
                self.cache
                    .insert(key, CachedResponse::Intent(intent.clone()))
                    .await;
                intent
            }
            None => {
                // not cached, so the service is asked again once it recovers
                let intent = fallback_intent(text);
                debug!("Using keyword intent {} for {:?}", intent.intent_type, text);
                intent
            }
        }
    }

    async fn classify_remote(&self, text: &str) -> Option<QueryIntent> {
        if !self.llm.is_available() {
            return None;
        }

        let request = CompletionRequest {
            system: INTENT_SYSTEM_PROMPT.to_string(),
            user: intent_user_prompt(text),
            json: true,
        };

        match self.llm.complete(&request).await {
            CompletionOutcome::Completed(content) => {
                let parsed = parse_intent_reply(&content);
                if parsed.is_none() {
                    warn!("Unparseable intent reply, using keyword fallback");
                }
                parsed
            }
            CompletionOutcome::Failed(_) | CompletionOutcome::TimedOut(_) => None,
        }
    }
}

fn parse_intent_reply(content: &str) -> Option<QueryIntent> {
    let reply: IntentReply = serde_json::from_str(strip_code_fence(content)).ok()?;
    let intent_type = IntentType::parse(reply.intent.as_deref()?)?;
    let description = reply
        .explanation
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| describe(intent_type).to_string());

    Some(QueryIntent::new(
        intent_type,
        reply.confidence.unwrap_or(0.5),
        description,
    ))
}

/// Keyword heuristic checked in priority order: retrieval, aggregation, filtering.
pub fn fallback_intent(text: &str) -> QueryIntent {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

    let (intent_type, confidence) = if mentions(RETRIEVAL_WORDS) {
        (IntentType::Select, 0.7)
    } else if mentions(AGGREGATION_WORDS) {
        (IntentType::Aggregate, 0.7)
    } else if mentions(FILTER_WORDS) {
        (IntentType::Filter, 0.7)
    } else {
        (IntentType::Select, 0.5)
    };

    QueryIntent::new(intent_type, confidence, describe(intent_type))
}

fn describe(intent_type: IntentType) -> &'static str {
    match intent_type {
        IntentType::Select => "Retrieve rows",
        IntentType::Aggregate => "Compute summary statistics",
        IntentType::Filter => "Retrieve rows matching conditions",
        IntentType::Join => "Combine rows from several tables",
        IntentType::Update => "Modify existing rows",
        IntentType::Delete => "Remove rows",
        IntentType::Create => "Create new data",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyProvider, ScriptedProvider, SlowProvider, UnreachableProvider};
    use std::time::Duration;

    fn classifier(provider: Arc<dyn crate::llm::CompletionProvider>) -> (IntentClassifier, Arc<LlmManager>) {
        let llm = Arc::new(LlmManager::with_provider(provider, Duration::from_millis(200)));
        let classifier = IntentClassifier::new(Arc::clone(&llm), Arc::new(ResponseCache::default()));
        (classifier, llm)
    }

    #[tokio::test]
    async fn unreachable_service_falls_back_to_keywords() {
        let (classifier, _) = classifier(Arc::new(UnreachableProvider));
        let intent = classifier.classify("Show me all customers").await;
        assert_eq!(intent.intent_type, IntentType::Select);
        assert_eq!(intent.confidence, 0.7);
    }

    #[test]
    fn keyword_priority_is_retrieval_then_aggregation_then_filter() {
        assert_eq!(fallback_intent("get the count of orders").intent_type, IntentType::Select);
        let aggregate = fallback_intent("count orders where status is open");
        assert_eq!(aggregate.intent_type, IntentType::Aggregate);
        assert_eq!(aggregate.confidence, 0.7);
        assert_eq!(fallback_intent("find late orders").intent_type, IntentType::Filter);

        let default = fallback_intent("orders from last week");
        assert_eq!(default.intent_type, IntentType::Select);
        assert_eq!(default.confidence, 0.5);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "budget" contains "get", "summary" contains "sum"
        let intent = fallback_intent("budget summary");
        assert_eq!(intent.confidence, 0.5);
    }

    #[tokio::test]
    async fn well_formed_replies_are_used() {
        let (classifier, _) = classifier(Arc::new(ScriptedProvider::always(
            r#"{"intent": "AGGREGATE", "confidence": 0.93, "explanation": "Counts orders"}"#,
        )));
        let intent = classifier.classify("how many orders").await;
        assert_eq!(intent.intent_type, IntentType::Aggregate);
        assert_eq!(intent.confidence, 0.93);
        assert_eq!(intent.description, "Counts orders");
    }

    #[tokio::test]
    async fn labels_outside_the_enumeration_fall_back() {
        let (classifier, _) = classifier(Arc::new(ScriptedProvider::always(
            r#"{"intent": "SORT", "confidence": 0.9}"#,
        )));
        let intent = classifier.classify("show orders by date").await;
        assert_eq!(intent.intent_type, IntentType::Select);
        assert_eq!(intent.confidence, 0.7);
    }

    #[tokio::test]
    async fn timeouts_fall_back() {
        let (classifier, _) = classifier(Arc::new(SlowProvider::new(Duration::from_secs(5))));
        let intent = classifier.classify("sum of amounts").await;
        assert_eq!(intent.intent_type, IntentType::Aggregate);
    }

    #[tokio::test]
    async fn repeated_questions_call_out_once() {
        let provider = Arc::new(ScriptedProvider::always(
            r#"{"intent": "select", "confidence": 0.8}"#,
        ));
        let (classifier, llm) = classifier(provider.clone());

        let first = classifier.classify("list users").await;
        let second = classifier.classify("  list   users").await;
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_answers_are_not_cached() {
        let provider = Arc::new(FlakyProvider::failing_first(
            1,
            r#"{"intent": "aggregate", "confidence": 0.95}"#,
        ));
        let (classifier, _) = classifier(provider.clone());

        let first = classifier.classify("orders per month").await;
        assert_eq!(first.intent_type, IntentType::Select);
        assert_eq!(first.confidence, 0.5);

        let second = classifier.classify("orders per month").await;
        assert_eq!(provider.calls(), 2);
        assert_eq!(second.intent_type, IntentType::Aggregate);
        assert_eq!(second.confidence, 0.95);

        classifier.classify("orders per month").await;
        assert_eq!(provider.calls(), 2);
    }
}
