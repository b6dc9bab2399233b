//! `kcli ai …`: analysis actions plus config/status/usage/cost housekeeping.

use crate::runtime::Runtime;
use kcli_ai::{
    AiAction, AiClient, AiSettings, PricingSource, ProviderClient, ProviderConfig, ProviderKind,
    UsageLedger,
};
use kcli_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builds the AI client from the active profile. A disabled or unconfigured
/// profile yields a client that fails fast with `Disabled`.
pub async fn build_client(rt: &Runtime) -> Result<AiClient> {
    let ai = &rt.profile.ai;
    let backend: Option<Arc<dyn kcli_ai::ChatBackend>> = if ai.provider.is_empty() {
        None
    } else {
        let kind = ProviderKind::parse(&ai.provider)?;
        let config = ProviderConfig::new(
            kind,
            ai.api_key.clone(),
            (!ai.model.is_empty()).then(|| ai.model.clone()),
        );
        Some(Arc::new(ProviderClient::new(config)))
    };
    let settings = AiSettings {
        enabled: ai.enabled,
        hard_budget_usd: ai.hard_budget_usd,
        soft_limit_percent: ai.soft_limit_percent,
        min_call_interval: Duration::from_millis(ai.min_call_interval_ms),
        cache_ttl: Duration::from_secs(ai.cache_ttl_secs),
        cache_max_entries: ai.cache_max_entries,
        sweep_cadence: Duration::from_secs(60),
    };
    let ledger = Arc::new(UsageLedger::open(UsageLedger::default_path())?);
    let pricing = PricingSource::new(PricingSource::default_cache_path(), None)
        .load()
        .await;
    Ok(AiClient::new(backend, settings, ledger, pricing))
}

/// Resolves the analysis target: a resource-ish argument is expanded to its
/// live YAML so the model sees state, not just a name.
async fn resolve_target(rt: &Runtime, target: &[String]) -> Result<String> {
    let joined = target.join(" ");
    if joined.trim().is_empty() {
        return Err(Error::InvalidArgument("ai commands need a target".into()));
    }
    if let Some((kind, name)) = joined.split_once('/') {
        if !kind.contains(' ') && !name.contains(' ') {
            if let Ok(access) = rt.access().await {
                if let Ok(obj) = access.get(kind, rt.namespace().as_deref(), name).await {
                    return Ok(format!(
                        "{joined}\n{}",
                        serde_yaml::to_string(&obj).unwrap_or_default()
                    ));
                }
            }
        }
    }
    Ok(joined)
}

pub async fn analyze(rt: &Runtime, action: AiAction, target: &[String]) -> Result<()> {
    let client = build_client(rt).await?;
    let resolved = resolve_target(rt, target).await?;
    let timeout = Duration::from_secs(rt.globals.ai_timeout.unwrap_or(60));
    let answer = tokio::time::timeout(timeout, client.analyze(action, &resolved))
        .await
        .map_err(|_| Error::DeadlineExceeded(format!("ai call exceeded {timeout:?}")))??;
    rt.output.out(answer);
    client.close();
    Ok(())
}

pub fn show_config(rt: &Runtime) -> Result<()> {
    let ai = &rt.profile.ai;
    rt.output.out(format!("enabled:             {}", ai.enabled));
    rt.output.out(format!(
        "provider:            {}",
        if ai.provider.is_empty() { "<unset>" } else { &ai.provider }
    ));
    rt.output.out(format!(
        "model:               {}",
        if ai.model.is_empty() { "<default>" } else { &ai.model }
    ));
    rt.output.out(format!(
        "api_key:             {}",
        if ai.api_key.is_empty() { "<unset>" } else { "<keychain>" }
    ));
    rt.output
        .out(format!("hard_budget_usd:     {:.2}", ai.hard_budget_usd));
    rt.output
        .out(format!("soft_limit_percent:  {}", ai.soft_limit_percent));
    rt.output
        .out(format!("min_call_interval:   {}ms", ai.min_call_interval_ms));
    rt.output
        .out(format!("cache_ttl:           {}s", ai.cache_ttl_secs));
    Ok(())
}

pub fn show_status(rt: &Runtime) -> Result<()> {
    let ai = &rt.profile.ai;
    let status = if !ai.enabled {
        "disabled"
    } else if ai.provider.is_empty() {
        "enabled, no provider"
    } else if ai.api_key.is_empty() {
        "enabled, provider set, no key"
    } else {
        "ready"
    };
    rt.output.out(status);
    Ok(())
}

pub fn show_usage(rt: &Runtime) -> Result<()> {
    let ledger = UsageLedger::open(UsageLedger::default_path())?;
    let usage = ledger.snapshot();
    rt.output.out(format!("month:              {}", usage.month));
    rt.output.out(format!("calls:              {}", usage.calls));
    rt.output
        .out(format!("cache_hits:         {}", usage.cache_hits));
    rt.output
        .out(format!("prompt_tokens:      {}", usage.prompt_tokens));
    rt.output
        .out(format!("completion_tokens:  {}", usage.completion_tokens));
    Ok(())
}

pub fn show_cost(rt: &Runtime) -> Result<()> {
    let ledger = UsageLedger::open(UsageLedger::default_path())?;
    let usage = ledger.snapshot();
    let hard = rt.profile.ai.hard_budget_usd;
    let percent = if hard > 0.0 {
        usage.estimated_cost_usd / hard * 100.0
    } else {
        0.0
    };
    rt.output.out(format!(
        "estimated spend: ${:.2} of ${hard:.2} ({percent:.0}%)",
        usage.estimated_cost_usd
    ));
    Ok(())
}
