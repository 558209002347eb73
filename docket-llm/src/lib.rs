//! Docket LLM - Analysis Provider Abstraction
//!
//! Provides traits for the AI model that turns a prompt payload into a
//! structured analysis. Concrete vendors are registered explicitly; there is
//! no auto-discovery.

use async_trait::async_trait;
use docket_core::{
    AnalysisType, CaseId, DocketError, DocketResult, DocumentId, DurationMs, LlmError, ModelTier,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// PROMPT PAYLOAD
// ============================================================================

/// One document's extracted text as handed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDocument {
    pub document_id: DocumentId,
    pub content_hash: String,
    pub text: String,
}

/// Everything the model sees for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub case_id: CaseId,
    pub analysis_type: AnalysisType,
    /// `<AnalysisType>@<template_version>`.
    pub prompt_signature: String,
    pub model_version: String,
    pub documents: Vec<PromptDocument>,
    /// Case metadata (parties, court, status) supplied by the host application.
    pub case_context: serde_json::Value,
}

impl PromptPayload {
    /// Rough input size. 4 chars per token.
    pub fn estimated_input_tokens(&self) -> i64 {
        let chars: usize = self.documents.iter().map(|d| d.text.len()).sum::<usize>()
            + self.case_context.to_string().len();
        (chars / 4) as i64
    }
}

/// Structured output of one provider invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: serde_json::Value,
    pub tokens_used: i64,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f32,
    /// Concrete model that served the request.
    pub model_used: String,
    /// Time the provider spent producing the completion.
    pub duration_ms: DurationMs,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Trait for analysis providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct HostedModel { /* ... */ }
///
/// #[async_trait]
/// impl AnalysisProvider for HostedModel {
///     fn provider_id(&self) -> &str { "hosted" }
///     async fn invoke(&self, payload: &PromptPayload, tier: ModelTier) -> Result<Completion, LlmError> {
///         // Call the vendor API
///     }
/// }
/// ```
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Stable identifier used in logs and errors.
    fn provider_id(&self) -> &str;

    /// Run one analysis.
    ///
    /// # Returns
    /// * `Ok(Completion)` - The structured result
    /// * `Err(LlmError)` - Check [`LlmError::is_transient`] to decide on retry
    async fn invoke(&self, payload: &PromptPayload, tier: ModelTier) -> Result<Completion, LlmError>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for analysis providers.
/// Providers must be explicitly registered - no auto-discovery.
///
/// A tier-specific provider wins over the default one.
///
/// # Example
/// ```ignore
/// let mut registry = ProviderRegistry::new();
/// registry.register_default(Arc::new(standard_model));
/// registry.register_for_tier(ModelTier::Deep, Arc::new(deep_model));
///
/// let provider = registry.provider_for(ModelTier::Deep)?;
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    default: Option<Arc<dyn AnalysisProvider>>,
    by_tier: HashMap<ModelTier, Arc<dyn AnalysisProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fallback provider. Replaces any previous one.
    pub fn register_default(&mut self, provider: Arc<dyn AnalysisProvider>) {
        self.default = Some(provider);
    }

    /// Register a provider for one tier. Replaces any previous one.
    pub fn register_for_tier(&mut self, tier: ModelTier, provider: Arc<dyn AnalysisProvider>) {
        self.by_tier.insert(tier, provider);
    }

    /// Provider serving `tier`.
    ///
    /// # Returns
    /// * `Err(DocketError::Llm(LlmError::ProviderNotConfigured))` - If neither
    ///   a tier-specific nor a default provider is registered
    pub fn provider_for(&self, tier: ModelTier) -> DocketResult<Arc<dyn AnalysisProvider>> {
        self.by_tier
            .get(&tier)
            .or(self.default.as_ref())
            .cloned()
            .ok_or(DocketError::Llm(LlmError::ProviderNotConfigured))
    }

    /// Check if any provider is registered.
    pub fn is_configured(&self) -> bool {
        self.default.is_some() || !self.by_tier.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tiers: Vec<_> = self.by_tier.keys().map(|t| t.as_db_str()).collect();
        tiers.sort();
        f.debug_struct("ProviderRegistry")
            .field("default", &self.default.as_ref().map(|p| p.provider_id().to_string()))
            .field("tiers", &tiers)
            .finish()
    }
}

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Tracks invocations and token usage per model tier.
/// Thread-safe via atomic operations.
#[derive(Debug, Default)]
pub struct UsageTracker {
    invocations: AtomicU64,
    failures: AtomicU64,
    fast_tokens: AtomicI64,
    standard_tokens: AtomicI64,
    deep_tokens: AtomicI64,
}

/// Point-in-time copy of [`UsageTracker`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub invocations: u64,
    pub failures: u64,
    pub fast_tokens: i64,
    pub standard_tokens: i64,
    pub deep_tokens: i64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> i64 {
        self.fast_tokens + self.standard_tokens + self.deep_tokens
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful invocation.
    pub fn record_completion(&self, tier: ModelTier, tokens: i64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.tier_counter(tier).fetch_add(tokens, Ordering::Relaxed);
    }

    /// Record a failed invocation.
    pub fn record_failure(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fast_tokens: self.fast_tokens.load(Ordering::Relaxed),
            standard_tokens: self.standard_tokens.load(Ordering::Relaxed),
            deep_tokens: self.deep_tokens.load(Ordering::Relaxed),
        }
    }

    fn tier_counter(&self, tier: ModelTier) -> &AtomicI64 {
        match tier {
            ModelTier::Fast => &self.fast_tokens,
            ModelTier::Standard => &self.standard_tokens,
            ModelTier::Deep => &self.deep_tokens,
        }
    }
}

// ============================================================================
// MOCK PROVIDER FOR TESTING
// ============================================================================

/// Mock analysis provider for testing.
///
/// Returns scripted outcomes in order, then falls back to a deterministic
/// completion derived from the payload. Records every invocation.
#[derive(Debug)]
pub struct MockAnalysisProvider {
    id: String,
    script: tokio::sync::Mutex<VecDeque<Result<Completion, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicU64,
    seen: tokio::sync::Mutex<Vec<(PromptPayload, ModelTier)>>,
}

impl MockAnalysisProvider {
    pub fn new() -> Self {
        Self {
            id: "mock".to_string(),
            script: tokio::sync::Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicU64::new(0),
            seen: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue outcomes returned by the next invocations, in order.
    pub fn with_script(mut self, outcomes: impl IntoIterator<Item = Result<Completion, LlmError>>) -> Self {
        self.script.get_mut().extend(outcomes);
        self
    }

    /// Queue one failure.
    pub async fn push_failure(&self, err: LlmError) {
        self.script.lock().await.push_back(Err(err));
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads and tiers received so far.
    pub async fn invocations(&self) -> Vec<(PromptPayload, ModelTier)> {
        self.seen.lock().await.clone()
    }

    fn default_completion(payload: &PromptPayload, tier: ModelTier, duration_ms: DurationMs) -> Completion {
        let hashes: Vec<&str> = payload
            .documents
            .iter()
            .map(|d| d.content_hash.as_str())
            .collect();
        Completion {
            content: serde_json::json!({
                "analysis_type": payload.analysis_type.as_db_str(),
                "summary": format!(
                    "{} over {} document(s)",
                    payload.analysis_type,
                    payload.documents.len()
                ),
                "documents": hashes,
            }),
            tokens_used: payload.estimated_input_tokens() + 64,
            confidence: 0.9,
            model_used: format!("{}-{}", payload.model_version, tier.as_db_str().to_lowercase()),
            duration_ms,
        }
    }
}

impl Default for MockAnalysisProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, payload: &PromptPayload, tier: ModelTier) -> Result<Completion, LlmError> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push((payload.clone(), tier));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(Self::default_completion(
                payload,
                tier,
                started.elapsed().as_millis() as DurationMs,
            )),
        }
    }
}
