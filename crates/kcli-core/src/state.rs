//! Persistent CLI state: context history, favorites, context groups and
//! failure memory. JSON on disk next to the config file, mode 0600.

use crate::config::{restrict_dir, restrict_file};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";
const HISTORY_LIMIT: usize = 50;

/// Last known failure for a context, surfaced as a warning on `ctx` switch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct State {
    /// Most recent first, bounded at [`HISTORY_LIMIT`].
    #[serde(default)]
    pub context_history: Vec<String>,
    #[serde(default)]
    pub favorites: Vec<String>,
    /// Named sets of contexts targeted by a single command.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub failures: BTreeMap<String, FailureRecord>,
    /// Plugin names the user has explicitly allowed.
    #[serde(default)]
    pub allowed_plugins: Vec<String>,
}

impl State {
    pub fn record_context(&mut self, context: &str) {
        self.context_history.retain(|c| c != context);
        self.context_history.insert(0, context.to_string());
        self.context_history.truncate(HISTORY_LIMIT);
    }

    pub fn record_failure(&mut self, context: &str, error: &str) {
        self.failures.insert(
            context.to_string(),
            FailureRecord {
                error: error.to_string(),
                at: Utc::now(),
            },
        );
    }

    pub fn clear_failure(&mut self, context: &str) {
        self.failures.remove(context);
    }

    /// Failure within the window, if any. Used to warn before switching.
    pub fn recent_failure(&self, context: &str, within: chrono::Duration) -> Option<&FailureRecord> {
        self.failures
            .get(context)
            .filter(|f| Utc::now() - f.at <= within)
    }

    pub fn is_plugin_allowed(&self, name: &str) -> bool {
        self.allowed_plugins.iter().any(|p| p == name)
    }

    pub fn allow_plugin(&mut self, name: &str) {
        if !self.is_plugin_allowed(name) {
            self.allowed_plugins.push(name.to_string());
        }
    }

    pub fn revoke_plugin(&mut self, name: &str) {
        self.allowed_plugins.retain(|p| p != name);
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Internal("no user config directory".into()))?
            .join("kcli");
        Ok(Self::new(dir.join(STATE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<State> {
        if !self.path.exists() {
            return Ok(State::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, state: &State) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            restrict_dir(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        restrict_file(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load, mutate, save.
    pub fn update<F: FnOnce(&mut State)>(&self, f: F) -> Result<State> {
        let mut state = self.load()?;
        f(&mut state);
        self.save(&state)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn history_is_deduped_and_bounded() {
        let mut state = State::default();
        for i in 0..60 {
            state.record_context(&format!("ctx-{i}"));
        }
        state.record_context("ctx-59");
        assert_eq!(state.context_history.len(), HISTORY_LIMIT);
        assert_eq!(state.context_history[0], "ctx-59");
        assert_eq!(
            state
                .context_history
                .iter()
                .filter(|c| *c == "ctx-59")
                .count(),
            1
        );
    }

    #[test]
    fn failure_memory_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store
            .update(|s| s.record_failure("prod", "connection refused"))
            .unwrap();
        let state = store.load().unwrap();
        assert!(state
            .recent_failure("prod", chrono::Duration::minutes(5))
            .is_some());
        assert!(state
            .recent_failure("staging", chrono::Duration::minutes(5))
            .is_none());
    }

    #[test]
    fn plugin_allow_revoke() {
        let mut state = State::default();
        assert!(!state.is_plugin_allowed("whoami"));
        state.allow_plugin("whoami");
        state.allow_plugin("whoami");
        assert_eq!(state.allowed_plugins.len(), 1);
        state.revoke_plugin("whoami");
        assert!(!state.is_plugin_allowed("whoami"));
    }
}
