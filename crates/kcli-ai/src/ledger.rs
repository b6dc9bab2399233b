//! Monthly usage ledger. Totals only ever grow within a month and the record
//! swaps atomically to a fresh one at the month boundary.

use chrono::Utc;
use kcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MonthlyUsage {
    /// Calendar month key, e.g. `2026-08`.
    pub month: String,
    pub calls: u64,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

pub struct UsageLedger {
    path: PathBuf,
    current: Mutex<MonthlyUsage>,
}

impl UsageLedger {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut usage = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            MonthlyUsage::default()
        };
        if usage.month != current_month() {
            usage = MonthlyUsage {
                month: current_month(),
                ..Default::default()
            };
        }
        Ok(Self {
            path,
            current: Mutex::new(usage),
        })
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kcli")
            .join("ai-usage.json")
    }

    /// Rolls to a fresh record when the calendar month changed. Called with
    /// the lock held by every accessor.
    fn roll_if_needed(usage: &mut MonthlyUsage) {
        let month = current_month();
        if usage.month != month {
            *usage = MonthlyUsage {
                month,
                ..Default::default()
            };
        }
    }

    pub fn record_call(&self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Result<()> {
        let snapshot = {
            let mut usage = self.current.lock().unwrap();
            Self::roll_if_needed(&mut usage);
            usage.calls += 1;
            usage.prompt_tokens += prompt_tokens;
            usage.completion_tokens += completion_tokens;
            usage.estimated_cost_usd += cost_usd.max(0.0);
            usage.clone()
        };
        self.persist(&snapshot)
    }

    pub fn record_cache_hit(&self) -> Result<()> {
        let snapshot = {
            let mut usage = self.current.lock().unwrap();
            Self::roll_if_needed(&mut usage);
            usage.calls += 1;
            usage.cache_hits += 1;
            usage.clone()
        };
        self.persist(&snapshot)
    }

    pub fn month_to_date_cost(&self) -> f64 {
        let mut usage = self.current.lock().unwrap();
        Self::roll_if_needed(&mut usage);
        usage.estimated_cost_usd
    }

    pub fn snapshot(&self) -> MonthlyUsage {
        let mut usage = self.current.lock().unwrap();
        Self::roll_if_needed(&mut usage);
        usage.clone()
    }

    /// Test and maintenance hook: seed the current month with a known spend.
    pub fn seed_cost(&self, cost_usd: f64) -> Result<()> {
        let snapshot = {
            let mut usage = self.current.lock().unwrap();
            Self::roll_if_needed(&mut usage);
            usage.estimated_cost_usd = cost_usd;
            usage.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, usage: &MonthlyUsage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(usage)?)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn totals_are_non_decreasing() {
        let dir = tempdir().unwrap();
        let ledger = UsageLedger::open(dir.path().join("usage.json")).unwrap();
        ledger.record_call(100, 50, 0.01).unwrap();
        let first = ledger.snapshot();
        ledger.record_cache_hit().unwrap();
        ledger.record_call(10, 5, 0.002).unwrap();
        let second = ledger.snapshot();
        assert!(second.calls > first.calls);
        assert!(second.estimated_cost_usd >= first.estimated_cost_usd);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.prompt_tokens, 110);
    }

    #[test]
    fn reopen_preserves_current_month() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage.json");
        {
            let ledger = UsageLedger::open(path.clone()).unwrap();
            ledger.record_call(10, 10, 1.5).unwrap();
        }
        let reopened = UsageLedger::open(path).unwrap();
        assert_eq!(reopened.snapshot().calls, 1);
        assert!((reopened.month_to_date_cost() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn stale_month_resets_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let stale = MonthlyUsage {
            month: "1999-01".to_string(),
            calls: 40,
            cache_hits: 4,
            prompt_tokens: 100,
            completion_tokens: 100,
            estimated_cost_usd: 99.0,
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();
        let ledger = UsageLedger::open(path).unwrap();
        let usage = ledger.snapshot();
        assert_eq!(usage.calls, 0);
        assert_eq!(usage.estimated_cost_usd, 0.0);
        assert_ne!(usage.month, "1999-01");
    }
}
