//! kcli-ai: provider-backed analysis with deterministic caching, rate
//! limiting, a monthly usage ledger and hard/soft budget guardrails.
//!
//! The gateway never depends on this crate; only the CLI and TUI do.

pub mod cache;
pub mod ledger;
pub mod pricing;
pub mod provider;
pub mod sanitize;
pub mod tokens;

pub use cache::AnalysisCache;
pub use ledger::{MonthlyUsage, UsageLedger};
pub use pricing::{PricingSource, PricingTable, ProviderRates};
pub use provider::{ChatBackend, ProviderClient, ProviderConfig, ProviderKind};

use kcli_core::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiAction {
    Explain,
    Why,
    SuggestFix,
    SummarizeEvents,
    Query,
}

impl AiAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiAction::Explain => "explain",
            AiAction::Why => "why",
            AiAction::SuggestFix => "suggest-fix",
            AiAction::SummarizeEvents => "summarize-events",
            AiAction::Query => "query",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "explain" => Ok(AiAction::Explain),
            "why" => Ok(AiAction::Why),
            "suggest-fix" | "fix" => Ok(AiAction::SuggestFix),
            "summarize" | "summarize-events" => Ok(AiAction::SummarizeEvents),
            "query" => Ok(AiAction::Query),
            other => Err(Error::InvalidArgument(format!("unknown ai action '{other}'"))),
        }
    }

    /// Action-specific template; `{target}` is the delimiter-wrapped input.
    fn template(&self) -> &'static str {
        match self {
            AiAction::Explain => {
                "Explain what this Kubernetes resource is and what it is currently doing:\n{target}"
            }
            AiAction::Why => {
                "Diagnose why this Kubernetes resource is in its current state. List the most \
                 likely causes in order:\n{target}"
            }
            AiAction::SuggestFix => {
                "Suggest a concrete, minimal fix for the problem shown by this Kubernetes \
                 resource. Call out anything destructive:\n{target}"
            }
            AiAction::SummarizeEvents => {
                "Summarize these Kubernetes events: group related ones, highlight warnings, \
                 keep it short:\n{target}"
            }
            AiAction::Query => "Answer this question using the provided cluster context:\n{target}",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub enabled: bool,
    pub hard_budget_usd: f64,
    pub soft_limit_percent: u8,
    pub min_call_interval: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub sweep_cadence: Duration,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hard_budget_usd: 25.0,
            soft_limit_percent: 80,
            min_call_interval: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(900),
            cache_max_entries: 256,
            sweep_cadence: Duration::from_secs(60),
        }
    }
}

pub struct AiClient {
    backend: Option<Arc<dyn ChatBackend>>,
    settings: AiSettings,
    cache: Arc<AnalysisCache>,
    ledger: Arc<UsageLedger>,
    pricing: PricingTable,
    last_call: Mutex<Option<Instant>>,
}

impl AiClient {
    pub fn new(
        backend: Option<Arc<dyn ChatBackend>>,
        settings: AiSettings,
        ledger: Arc<UsageLedger>,
        pricing: PricingTable,
    ) -> Self {
        let cache = AnalysisCache::new(settings.cache_max_entries, settings.cache_ttl);
        cache.start_sweeper(settings.sweep_cadence);
        Self {
            backend,
            settings,
            cache,
            ledger,
            pricing,
            last_call: Mutex::new(None),
        }
    }

    pub fn usage(&self) -> MonthlyUsage {
        self.ledger.snapshot()
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    /// Stops the cache sweeper. Idempotent.
    pub fn close(&self) {
        self.cache.close();
    }

    /// The one primary operation. Policy, in strict order: enablement check,
    /// prompt construction, inter-call spacing, hard budget gate, cache
    /// lookup, provider call with usage accounting and the soft-limit notice.
    pub async fn analyze(&self, action: AiAction, target: &str) -> Result<String> {
        // 1. Enablement.
        if !self.settings.enabled {
            return Err(Error::Disabled("ai is disabled in the active profile".into()));
        }
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| Error::Disabled("no ai provider configured".into()))?;
        backend.validate()?;
        let provider = backend.provider_name();

        // 2. Prompt construction: template, sanitize, delimit.
        let system_prompt = sanitize::system_prompt();
        let user_prompt = action
            .template()
            .replace("{target}", &sanitize::wrap_untrusted(target));

        // 3. Inter-call spacing: block for the remaining quantum.
        self.pace().await;

        // 4. Hard budget gate; no provider traffic past this point if spent.
        let spent = self.ledger.month_to_date_cost();
        if spent >= self.settings.hard_budget_usd {
            return Err(Error::BudgetExceeded(format!(
                "month-to-date ${spent:.2} >= hard budget ${:.2}",
                self.settings.hard_budget_usd
            )));
        }

        // 5. Deterministic cache.
        let key = cache::cache_key(&provider, action.as_str(), target);
        if let Some(hit) = self.cache.get(&key) {
            self.ledger.record_cache_hit()?;
            return Ok(hit);
        }

        // 6. Provider call, accounting, cache write, soft notice.
        let answer = backend.query(&system_prompt, &user_prompt).await?;
        let prompt_tokens = tokens::estimate_tokens(&system_prompt) + tokens::estimate_tokens(&user_prompt);
        let completion_tokens = tokens::estimate_tokens(&answer);
        let cost = self.pricing.cost(&provider, prompt_tokens, completion_tokens);
        self.ledger.record_call(prompt_tokens, completion_tokens, cost)?;
        self.cache.put(&key, &answer);

        let spent = self.ledger.month_to_date_cost();
        let soft_threshold =
            self.settings.hard_budget_usd * f64::from(self.settings.soft_limit_percent) / 100.0;
        if spent >= soft_threshold {
            return Ok(format!(
                "{answer}\n[ai-budget] usage ${spent:.2}/${:.2} (soft limit {}% reached)",
                self.settings.hard_budget_usd, self.settings.soft_limit_percent
            ));
        }
        Ok(answer)
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.min_call_interval {
                tokio::time::sleep(self.settings.min_call_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Drop for AiClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct MockProvider {
        calls: AtomicU32,
        reply: String,
    }

    impl MockProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reply: reply.to_string(),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for MockProvider {
        fn provider_name(&self) -> String {
            "mock".to_string()
        }

        fn validate(&self) -> Result<()> {
            Ok(())
        }

        async fn query(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn settings(hard: f64) -> AiSettings {
        AiSettings {
            enabled: true,
            hard_budget_usd: hard,
            soft_limit_percent: 80,
            min_call_interval: Duration::from_millis(1),
            cache_ttl: Duration::from_secs(60),
            cache_max_entries: 64,
            sweep_cadence: Duration::from_secs(60),
        }
    }

    fn ledger_at(dir: &std::path::Path, cost: f64) -> Arc<UsageLedger> {
        let ledger = Arc::new(UsageLedger::open(dir.join("usage.json")).unwrap());
        ledger.seed_cost(cost).unwrap();
        ledger
    }

    #[tokio::test]
    async fn disabled_client_fails_fast() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("x");
        let mut s = settings(50.0);
        s.enabled = false;
        let client = AiClient::new(
            Some(mock.clone()),
            s,
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        assert!(matches!(
            client.analyze(AiAction::Why, "pod/api").await,
            Err(Error::Disabled(_))
        ));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn missing_provider_is_disabled() {
        let dir = tempdir().unwrap();
        let client = AiClient::new(
            None,
            settings(50.0),
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        assert!(matches!(
            client.analyze(AiAction::Why, "pod/api").await,
            Err(Error::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn budget_gate_blocks_before_any_provider_traffic() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("x");
        let client = AiClient::new(
            Some(mock.clone()),
            settings(50.0),
            ledger_at(dir.path(), 60.0),
            PricingTable::bundled(),
        );
        let out = client.analyze(AiAction::Why, "pod/api").await;
        assert!(matches!(out, Err(Error::BudgetExceeded(_))));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn soft_limit_appends_notice() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("looks like an OOMKill");
        let client = AiClient::new(
            Some(mock.clone()),
            settings(50.0),
            ledger_at(dir.path(), 45.0),
            // Mock provider is not in the table: zero marginal cost.
            PricingTable::bundled(),
        );
        let out = client.analyze(AiAction::Why, "pod/api").await.unwrap();
        assert!(out.starts_with("looks like an OOMKill"));
        assert!(
            out.ends_with("[ai-budget] usage $45.00/$50.00 (soft limit 80% reached)"),
            "unexpected notice: {out}"
        );
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_calls_hit_cache() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("CrashLoopBackOff analysis");
        let client = AiClient::new(
            Some(mock.clone()),
            settings(50.0),
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        for _ in 0..20 {
            let out = client.analyze(AiAction::Why, "pod/api").await.unwrap();
            assert!(out.contains("CrashLoopBackOff analysis"));
        }
        assert_eq!(mock.calls(), 1);
        let usage = client.usage();
        assert_eq!(usage.calls, 20);
        assert_eq!(usage.cache_hits, 19);
        assert!(usage.cache_hits >= 14);
    }

    #[tokio::test]
    async fn distinct_targets_miss_cache() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("x");
        let client = AiClient::new(
            Some(mock.clone()),
            settings(50.0),
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        client.analyze(AiAction::Why, "pod/api").await.unwrap();
        client.analyze(AiAction::Why, "pod/db").await.unwrap();
        client.analyze(AiAction::Explain, "pod/api").await.unwrap();
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_spaces_calls() {
        let dir = tempdir().unwrap();
        let mock = MockProvider::new("x");
        let mut s = settings(50.0);
        s.min_call_interval = Duration::from_millis(40);
        let client = AiClient::new(
            Some(mock.clone()),
            s,
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        let started = Instant::now();
        client.analyze(AiAction::Why, "a").await.unwrap();
        client.analyze(AiAction::Why, "b").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let client = AiClient::new(
            None,
            settings(1.0),
            ledger_at(dir.path(), 0.0),
            PricingTable::bundled(),
        );
        client.close();
        client.close();
    }
}
