//! Provider pricing: live-fetched cache file when fresh, on-disk cache when
//! not, bundled fallback always. A provider missing from the table costs
//! zero, which keeps the budget gate conservative-safe.

use chrono::{DateTime, Utc};
use kcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const PRICING_URL: &str = "https://raw.githubusercontent.com/kcli-dev/pricing/main/v1/pricing.json";
pub const MAX_CACHE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderRates {
    pub input_per_1k_usd: f64,
    pub output_per_1k_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PricingFile {
    schema: u32,
    fetched_at: DateTime<Utc>,
    rates: BTreeMap<String, ProviderRates>,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: BTreeMap<String, ProviderRates>,
}

impl PricingTable {
    /// Conservative static rates shipped with the binary.
    pub fn bundled() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(
            "openai".to_string(),
            ProviderRates {
                input_per_1k_usd: 0.005,
                output_per_1k_usd: 0.015,
            },
        );
        rates.insert(
            "anthropic".to_string(),
            ProviderRates {
                input_per_1k_usd: 0.003,
                output_per_1k_usd: 0.015,
            },
        );
        rates.insert(
            "openrouter".to_string(),
            ProviderRates {
                input_per_1k_usd: 0.004,
                output_per_1k_usd: 0.012,
            },
        );
        Self { rates }
    }

    fn from_rates(rates: BTreeMap<String, ProviderRates>) -> Result<Self> {
        for (provider, r) in &rates {
            if r.input_per_1k_usd < 0.0 || r.output_per_1k_usd < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "negative rate for provider '{provider}'"
                )));
            }
        }
        Ok(Self { rates })
    }

    /// USD cost for a call. Unknown providers resolve to zero.
    pub fn cost(&self, provider: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        match self.rates.get(&provider.to_lowercase()) {
            Some(r) => {
                prompt_tokens as f64 / 1000.0 * r.input_per_1k_usd
                    + completion_tokens as f64 / 1000.0 * r.output_per_1k_usd
            }
            None => 0.0,
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = (&String, &ProviderRates)> {
        self.rates.iter()
    }
}

/// Loads pricing in priority order: fresh cache file, live fetch (persisted),
/// stale cache file, bundled table. Never fails.
pub struct PricingSource {
    cache_path: PathBuf,
    url: String,
    http: reqwest::Client,
}

impl PricingSource {
    pub fn new(cache_path: PathBuf, url: Option<String>) -> Self {
        Self {
            cache_path,
            url: url.unwrap_or_else(|| PRICING_URL.to_string()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn default_cache_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kcli")
            .join("pricing.json")
    }

    pub async fn load(&self) -> PricingTable {
        if let Some(file) = self.read_cache() {
            let age = Utc::now() - file.fetched_at;
            if age.to_std().map(|a| a <= MAX_CACHE_AGE).unwrap_or(false) {
                if let Ok(table) = PricingTable::from_rates(file.rates) {
                    return table;
                }
            }
        }
        match self.fetch().await {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!(target: "kcli::ai", error = %e, "pricing refresh failed");
                self.read_cache()
                    .and_then(|f| PricingTable::from_rates(f.rates).ok())
                    .unwrap_or_else(PricingTable::bundled)
            }
        }
    }

    async fn fetch(&self) -> Result<PricingTable> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("pricing fetch: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transient(format!(
                "pricing fetch: HTTP {}",
                response.status()
            )));
        }
        let file: PricingFile = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("pricing decode: {e}")))?;
        if file.schema != 1 {
            return Err(Error::Internal(format!(
                "unsupported pricing schema {}",
                file.schema
            )));
        }
        let table = PricingTable::from_rates(file.rates.clone())?;
        self.write_cache(&PricingFile {
            schema: 1,
            fetched_at: Utc::now(),
            rates: file.rates,
        });
        Ok(table)
    }

    fn read_cache(&self) -> Option<PricingFile> {
        let content = std::fs::read_to_string(&self.cache_path).ok()?;
        let file: PricingFile = serde_json::from_str(&content).ok()?;
        (file.schema == 1).then_some(file)
    }

    fn write_cache(&self, file: &PricingFile) {
        let write = || -> Result<()> {
            if let Some(parent) = self.cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.cache_path, serde_json::to_vec_pretty(file)?)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::debug!(target: "kcli::ai", error = %e, "pricing cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_provider_costs_zero() {
        let table = PricingTable::bundled();
        assert_eq!(table.cost("mystery", 10_000, 10_000), 0.0);
        assert!(table.cost("openai", 1000, 1000) > 0.0);
    }

    #[test]
    fn negative_rates_are_rejected() {
        let mut rates = BTreeMap::new();
        rates.insert(
            "bad".to_string(),
            ProviderRates {
                input_per_1k_usd: -1.0,
                output_per_1k_usd: 0.0,
            },
        );
        assert!(PricingTable::from_rates(rates).is_err());
    }

    #[test]
    fn cost_arithmetic() {
        let table = PricingTable::bundled();
        // 1k in at 0.003 + 2k out at 0.015.
        let cost = table.cost("anthropic", 1000, 2000);
        assert!((cost - 0.033).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_network() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        let mut rates = BTreeMap::new();
        rates.insert(
            "openai".to_string(),
            ProviderRates {
                input_per_1k_usd: 1.0,
                output_per_1k_usd: 2.0,
            },
        );
        std::fs::write(
            &path,
            serde_json::to_vec(&PricingFile {
                schema: 1,
                fetched_at: Utc::now(),
                rates,
            })
            .unwrap(),
        )
        .unwrap();
        // Unroutable URL: if the cache were ignored this would fall back to
        // bundled rates instead of the cached ones.
        let source = PricingSource::new(path, Some("http://127.0.0.1:1/pricing".into()));
        let table = source.load().await;
        assert_eq!(table.cost("openai", 1000, 0), 1.0);
    }

    #[tokio::test]
    async fn falls_back_to_bundled_without_cache_or_network() {
        let dir = tempdir().unwrap();
        let source = PricingSource::new(
            dir.path().join("missing.json"),
            Some("http://127.0.0.1:1/pricing".into()),
        );
        let table = source.load().await;
        assert!(table.cost("openai", 1000, 1000) > 0.0);
    }
}
