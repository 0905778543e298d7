use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BackendConfig, Config};
use crate::credits::CreditGate;
use crate::error::ChatError;
use crate::gateway::protocol::{ChatRequest, ChatResponse, ChatSource};
use crate::knowledge::{QueryEngine, SearchOutcome, SearchQuery};
use crate::providers::{resolve_provider, ModelProvider, ProviderMessage, ProviderRequest};
use crate::routing::{KeywordModeDetector, Mode, ModeDetector, ProviderRouter, ProviderTier};

const CLIENT_SYSTEM_PROMPT: &str = "You are a customer support assistant. Answer the \
customer's question clearly and politely using only the knowledge provided below. If the \
knowledge does not cover the question, say so and offer to connect them with the team. \
Never mention internal procedures.";

const COMPANION_SYSTEM_PROMPT: &str = "You are an internal operations assistant for the \
support and sales team. Answer precisely using the knowledge provided below, including \
internal procedures where relevant. Point out gaps in the knowledge base when you find them.";

/// Per-snippet cap on grounding context, in characters.
const MAX_CONTEXT_CHARS: usize = 1200;

// ============================================================================
// Backends
// ============================================================================

/// A generation backend tier: its settings and, when credentials resolved,
/// the provider serving it.
#[derive(Clone)]
pub struct Backend {
    config: BackendConfig,
    provider: Option<Arc<dyn ModelProvider>>,
}

impl Backend {
    pub fn new(config: BackendConfig, provider: Option<Arc<dyn ModelProvider>>) -> Self {
        Self { config, provider }
    }

    /// Resolve the provider for `config.model`. A missing key is logged and
    /// leaves the tier unserved rather than failing startup.
    pub fn resolve(config: &BackendConfig, app: &Config, tier: ProviderTier) -> Self {
        let provider = match resolve_provider(&app.models, &config.model) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(tier = tier.as_str(), model = %config.model, "backend not configured: {e}");
                None
            }
        };
        Self::new(config.clone(), provider)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Chat Service
// ============================================================================

/// Answers chat messages: credit check, mode detection, routing, grounding
/// search and generation.
#[derive(Clone)]
pub struct ChatService {
    detector: Arc<dyn ModeDetector>,
    router: ProviderRouter,
    engine: QueryEngine,
    fast: Backend,
    deep: Backend,
    credits: Arc<dyn CreditGate>,
    grounding_top_k: u32,
}

impl ChatService {
    pub fn new(
        detector: Arc<dyn ModeDetector>,
        router: ProviderRouter,
        engine: QueryEngine,
        fast: Backend,
        deep: Backend,
        credits: Arc<dyn CreditGate>,
        grounding_top_k: u32,
    ) -> Self {
        Self {
            detector,
            router,
            engine,
            fast,
            deep,
            credits,
            grounding_top_k,
        }
    }

    pub fn from_config(
        config: &Config,
        engine: QueryEngine,
        credits: Arc<dyn CreditGate>,
    ) -> anyhow::Result<Self> {
        let routing = &config.routing;
        Ok(Self::new(
            Arc::new(KeywordModeDetector::new(routing)?),
            ProviderRouter::new(routing)?,
            engine,
            Backend::resolve(&routing.fast, config, ProviderTier::Fast),
            Backend::resolve(&routing.deep, config, ProviderTier::Deep),
            credits,
            routing.grounding_top_k,
        ))
    }

    pub fn detector(&self) -> &dyn ModeDetector {
        self.detector.as_ref()
    }

    pub async fn answer(
        &self,
        req: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(ChatError::InvalidRequest("message must not be empty".into()));
        }

        if !self
            .credits
            .can_proceed(req.caller_context.caller_id.as_deref())
            .await
        {
            info!(caller = ?req.caller_context.caller_id, "chat refused: no credit");
            return Err(ChatError::CreditDenied);
        }

        let detection = self.detector.detect(message, &req.caller_context);
        let decision = self
            .router
            .route(req.task_type, req.complexity, detection.mode, message);
        info!(
            mode = decision.mode.as_str(),
            trigger = %detection.trigger,
            provider = decision.provider.as_str(),
            escalate = decision.escalate,
            "chat routed"
        );

        let (grounding, degraded) = self.ground(message, decision.mode, cancel).await;
        let system = build_system_prompt(decision.mode, &grounding);

        let backend = match decision.provider {
            ProviderTier::Fast => &self.fast,
            ProviderTier::Deep => &self.deep,
        };
        let tier = decision.provider.as_str();
        let Some(provider) = &backend.provider else {
            error!(tier, model = backend.model(), "no provider configured for backend");
            return Err(ChatError::Backend { tier });
        };

        let request = ProviderRequest {
            model: backend.config.model.clone(),
            system: Some(system),
            messages: vec![ProviderMessage::user(message)],
            max_tokens: Some(backend.config.max_tokens),
            temperature: backend.config.temperature,
        };
        let response = match provider.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                error!(tier, provider = provider.name(), "generation failed: {e:#}");
                return Err(ChatError::Backend { tier });
            }
        };
        debug!(
            input_tokens = ?response.usage.input_tokens,
            output_tokens = ?response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "generation complete"
        );

        Ok(ChatResponse {
            provider_used: decision.provider,
            model: backend.config.model.clone(),
            mode: decision.mode,
            response: response.text,
            escalate: decision.escalate,
            sources: grounding
                .results
                .iter()
                .map(|r| ChatSource {
                    id: r.document.id.clone(),
                    title: r.document.title.clone(),
                    source_document: r.document.source_document.clone(),
                    score: r.score,
                })
                .collect(),
            degraded,
        })
    }

    /// Search the knowledge visible in `mode`. Failures degrade to an
    /// ungrounded answer.
    async fn ground(
        &self,
        message: &str,
        mode: Mode,
        cancel: &CancellationToken,
    ) -> (SearchOutcome, bool) {
        let empty = SearchOutcome {
            results: Vec::new(),
            total_count: 0,
            execution_time_ms: 0,
            degraded: false,
        };
        if self.grounding_top_k == 0 {
            return (empty, false);
        }

        let query = SearchQuery::new(message).with_top_k(i64::from(self.grounding_top_k));
        match self.engine.search(&query, mode.access_scope(), cancel).await {
            Ok(outcome) => {
                let degraded = outcome.degraded;
                (outcome, degraded)
            }
            Err(e) => {
                warn!("grounding search failed, answering without context: {e}");
                (empty, true)
            }
        }
    }
}

fn build_system_prompt(mode: Mode, grounding: &SearchOutcome) -> String {
    let mut prompt = String::from(match mode {
        Mode::Client => CLIENT_SYSTEM_PROMPT,
        Mode::Companion => COMPANION_SYSTEM_PROMPT,
    });

    if grounding.results.is_empty() {
        prompt.push_str("\n\nNo knowledge base entries matched this message.");
        return prompt;
    }

    prompt.push_str("\n\nKnowledge:\n");
    for (i, result) in grounding.results.iter().enumerate() {
        let doc = &result.document;
        let content: String = doc.content.chars().take(MAX_CONTEXT_CHARS).collect();
        let _ = write!(
            prompt,
            "\n[{}] {} ({})\n{}\n",
            i + 1,
            doc.title,
            doc.source_document,
            content
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoutingConfig, SearchConfig};
    use crate::credits::{DenyList, Unmetered};
    use crate::knowledge::embeddings::{HashEmbeddingProvider, RetryPolicy};
    use crate::knowledge::query::tests::UnreachableStore;
    use crate::knowledge::{
        Confidentiality, DocumentType, IngestDocument, IngestOptions, IngestionPipeline,
        SqliteKnowledgeIndex,
    };
    use crate::providers::{ProviderResponse, TokenUsage};
    use crate::routing::CallerContext;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<ProviderRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ModelProvider for Recorder {
        async fn chat(&self, request: ProviderRequest) -> anyhow::Result<ProviderResponse> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                anyhow::bail!("upstream said no (HTTP 500, key sk-secret)");
            }
            Ok(ProviderResponse {
                text: "answer".into(),
                stop_reason: Some("stop".into()),
                usage: TokenUsage::default(),
            })
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn doc(source: &str, content: &str, conf: Confidentiality) -> IngestDocument {
        IngestDocument {
            content: content.into(),
            source: source.into(),
            domain_tags: vec!["support".into()],
            document_type: DocumentType::Policy,
            confidentiality: conf,
            title: None,
            tags: vec![],
            priority: None,
        }
    }

    async fn service(
        provider: Arc<Recorder>,
        credits: Arc<dyn CreditGate>,
    ) -> ChatService {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let embedder = Arc::new(HashEmbeddingProvider::new(64, 8191));
        let pipeline = IngestionPipeline::new(store.clone(), embedder.clone(), IngestOptions::default());
        let report = pipeline
            .ingest(
                vec![
                    doc("refunds.md", "Refunds are issued within 5 business days.", Confidentiality::Public),
                    doc(
                        "refund-sop.md",
                        "Refund escalation SOP: route disputed refunds to the finance lead.",
                        Confidentiality::Internal,
                    ),
                ],
                &CancellationToken::new(),
            )
            .await;
        assert!(report.errors.is_empty());

        let engine = QueryEngine::new(store, embedder, SearchConfig::default(), RetryPolicy::default());
        let routing = RoutingConfig::default();
        let dyn_provider: Arc<dyn ModelProvider> = provider;
        ChatService::new(
            Arc::new(KeywordModeDetector::new(&routing).unwrap()),
            ProviderRouter::new(&routing).unwrap(),
            engine,
            Backend::new(routing.fast.clone(), Some(dyn_provider.clone())),
            Backend::new(routing.deep.clone(), Some(dyn_provider)),
            credits,
            routing.grounding_top_k,
        )
    }

    fn request(message: &str, caller: CallerContext) -> ChatRequest {
        ChatRequest {
            message: message.into(),
            caller_context: caller,
            task_type: Default::default(),
            complexity: Default::default(),
        }
    }

    #[tokio::test]
    async fn client_answers_are_grounded_on_public_knowledge_only() {
        let rec = Arc::new(Recorder::default());
        let svc = service(rec.clone(), Arc::new(Unmetered)).await;

        let resp = svc
            .answer(request("how long do refunds take", CallerContext::default()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.mode, Mode::Client);
        assert_eq!(resp.provider_used, ProviderTier::Fast);
        assert_eq!(resp.response, "answer");
        assert!(resp.sources.iter().all(|s| s.source_document == "refunds.md"));

        let sent = rec.requests.lock().unwrap();
        let system = sent[0].system.as_deref().unwrap();
        assert!(system.contains("customer support assistant"));
        assert!(!system.contains("finance lead"));
    }

    #[tokio::test]
    async fn internal_caller_gets_companion_mode_and_deep_tier() {
        let rec = Arc::new(Recorder::default());
        let svc = service(rec.clone(), Arc::new(Unmetered)).await;
        let caller = CallerContext {
            role: Some("Admin".into()),
            ..Default::default()
        };

        let resp = svc
            .answer(request("disputed refunds", caller), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.mode, Mode::Companion);
        assert_eq!(resp.provider_used, ProviderTier::Deep);
        assert!(resp.sources.iter().any(|s| s.source_document == "refund-sop.md"));
        assert_eq!(rec.requests.lock().unwrap()[0].model, RoutingConfig::default().deep.model);
    }

    #[tokio::test]
    async fn credit_denial_short_circuits() {
        let rec = Arc::new(Recorder::default());
        let svc = service(rec.clone(), Arc::new(DenyList::new(["u-broke"]))).await;
        let caller = CallerContext {
            caller_id: Some("u-broke".into()),
            ..Default::default()
        };

        let err = svc
            .answer(request("hello", caller), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::CreditDenied));
        assert!(rec.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_names_tier_only() {
        let rec = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let svc = service(rec, Arc::new(Unmetered)).await;

        let err = svc
            .answer(request("hello there", CallerContext::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ChatError::Backend { tier: "fast" }));
        assert!(!msg.contains("sk-secret"));
        assert!(!msg.contains("500"));
    }

    #[tokio::test]
    async fn unreachable_index_still_answers_degraded() {
        let rec = Arc::new(Recorder::default());
        let routing = RoutingConfig::default();
        let engine = QueryEngine::new(
            Arc::new(UnreachableStore),
            Arc::new(HashEmbeddingProvider::new(64, 8191)),
            SearchConfig::default(),
            RetryPolicy::default(),
        );
        let dyn_provider: Arc<dyn ModelProvider> = rec.clone();
        let svc = ChatService::new(
            Arc::new(KeywordModeDetector::new(&routing).unwrap()),
            ProviderRouter::new(&routing).unwrap(),
            engine,
            Backend::new(routing.fast.clone(), Some(dyn_provider.clone())),
            Backend::new(routing.deep.clone(), Some(dyn_provider)),
            Arc::new(Unmetered),
            routing.grounding_top_k,
        );

        let resp = svc
            .answer(request("how long do refunds take", CallerContext::default()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.degraded);
        assert!(resp.sources.is_empty());
        assert_eq!(resp.response, "answer");
        assert_eq!(rec.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let svc = service(Arc::new(Recorder::default()), Arc::new(Unmetered)).await;
        let err = svc
            .answer(request("   ", CallerContext::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
    }
}
