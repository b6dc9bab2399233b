//! Profile-based configuration with keychain-bound secrets.
//!
//! One YAML document under the per-user config dir holds every profile; the
//! active profile name is part of the document. Keys listed in a profile's
//! `secret_keys` are zeroed before the file hits disk and round-trip through
//! the OS secret store instead.

use crate::error::{Error, Result};
use crate::secrets::SecretStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
const CONFIG_FILE: &str = "config.yaml";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralSection {
    /// Prompt before mutating verbs unless `--yes` is passed.
    #[serde(default = "default_true")]
    pub confirm_mutations: bool,
    /// "auto" | "always" | "never"
    #[serde(default = "GeneralSection::default_color")]
    pub color: String,
}

impl GeneralSection {
    fn default_color() -> String {
        "auto".to_string()
    }
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            confirm_mutations: true,
            color: Self::default_color(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextSection {
    #[serde(default)]
    pub default_context: String,
    #[serde(default)]
    pub default_namespace: String,
    /// Extra kubeconfig paths searched after $KUBECONFIG.
    #[serde(default)]
    pub kubeconfig_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuiSection {
    #[serde(default = "TuiSection::default_refresh")]
    pub refresh_seconds: u64,
    /// "dark" | "light" | "high-contrast"
    #[serde(default = "TuiSection::default_theme")]
    pub theme: String,
    #[serde(default)]
    pub wide: bool,
}

impl TuiSection {
    fn default_refresh() -> u64 {
        5
    }
    fn default_theme() -> String {
        "dark".to_string()
    }
}

impl Default for TuiSection {
    fn default() -> Self {
        Self {
            refresh_seconds: Self::default_refresh(),
            theme: Self::default_theme(),
            wide: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogsSection {
    /// "error" | "warn" | "info" | "debug" | "trace"
    #[serde(default = "LogsSection::default_level")]
    pub level: String,
    #[serde(default)]
    pub file: String,
}

impl LogsSection {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSection {
    #[serde(default = "PerformanceSection::default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "PerformanceSection::default_topology_timeout")]
    pub topology_timeout_secs: u64,
    #[serde(default = "PerformanceSection::default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "PerformanceSection::default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "PerformanceSection::default_node_ceiling")]
    pub topology_node_ceiling: usize,
    #[serde(default = "PerformanceSection::default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl PerformanceSection {
    fn default_read_timeout() -> u64 {
        15
    }
    fn default_topology_timeout() -> u64 {
        30
    }
    fn default_cache_ttl() -> u64 {
        30
    }
    fn default_cache_max_entries() -> usize {
        512
    }
    fn default_node_ceiling() -> usize {
        5000
    }
    fn default_probe_interval() -> u64 {
        30
    }
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            read_timeout_secs: Self::default_read_timeout(),
            topology_timeout_secs: Self::default_topology_timeout(),
            cache_ttl_secs: Self::default_cache_ttl(),
            cache_max_entries: Self::default_cache_max_entries(),
            topology_node_ceiling: Self::default_node_ceiling(),
            probe_interval_secs: Self::default_probe_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShellSection {
    /// "bash" | "zsh" | "fish" | "" (unset)
    #[serde(default)]
    pub completion_shell: String,
    #[serde(default = "ShellSection::default_history")]
    pub history_size: usize,
}

impl ShellSection {
    fn default_history() -> usize {
        50
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSection {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "anthropic" | "openrouter" | "" (unset)
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    /// Keychain-bound by default (see `secret_keys`).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "AiSection::default_hard_budget")]
    pub hard_budget_usd: f64,
    #[serde(default = "AiSection::default_soft_percent")]
    pub soft_limit_percent: u8,
    #[serde(default = "AiSection::default_min_interval")]
    pub min_call_interval_ms: u64,
    #[serde(default = "AiSection::default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "AiSection::default_cache_entries")]
    pub cache_max_entries: usize,
}

impl AiSection {
    fn default_hard_budget() -> f64 {
        25.0
    }
    fn default_soft_percent() -> u8 {
        80
    }
    fn default_min_interval() -> u64 {
        1000
    }
    fn default_cache_ttl() -> u64 {
        900
    }
    fn default_cache_entries() -> usize {
        256
    }
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: String::new(),
            model: String::new(),
            api_key: String::new(),
            hard_budget_usd: Self::default_hard_budget(),
            soft_limit_percent: Self::default_soft_percent(),
            min_call_interval_ms: Self::default_min_interval(),
            cache_ttl_secs: Self::default_cache_ttl(),
            cache_max_entries: Self::default_cache_entries(),
        }
    }
}

/// One named profile. `secret_keys` lists dotted paths (e.g. `ai.api_key`)
/// whose values live in the OS secret store, never in this file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    #[serde(default)]
    pub general: GeneralSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub tui: TuiSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub performance: PerformanceSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default = "Profile::default_secret_keys")]
    pub secret_keys: Vec<String>,
}

impl Profile {
    fn default_secret_keys() -> Vec<String> {
        vec!["ai.api_key".to_string()]
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            general: GeneralSection::default(),
            context: ContextSection::default(),
            tui: TuiSection::default(),
            logs: LogsSection::default(),
            performance: PerformanceSection::default(),
            shell: ShellSection::default(),
            ai: AiSection::default(),
            secret_keys: Self::default_secret_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigRoot {
    pub version: u32,
    pub active_profile: String,
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for ConfigRoot {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), Profile::default());
        Self {
            version: CONFIG_SCHEMA_VERSION,
            active_profile: "default".to_string(),
            profiles,
        }
    }
}

const COLORS: &[&str] = &["auto", "always", "never"];
const THEMES: &[&str] = &["dark", "light", "high-contrast"];
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const SHELLS: &[&str] = &["", "bash", "zsh", "fish"];
const PROVIDERS: &[&str] = &["", "openai", "anthropic", "openrouter"];

/// Schema validation, applied on every load and before every write.
pub fn validate(root: &ConfigRoot) -> Result<()> {
    if root.version != CONFIG_SCHEMA_VERSION {
        return Err(Error::InvalidArgument(format!(
            "unsupported config schema version {}",
            root.version
        )));
    }
    if !root.profiles.contains_key(&root.active_profile) {
        return Err(Error::InvalidArgument(format!(
            "active profile '{}' does not exist",
            root.active_profile
        )));
    }
    for (name, p) in &root.profiles {
        let field = |what: &str, value: &str, allowed: &[&str]| -> Result<()> {
            if allowed.contains(&value) {
                Ok(())
            } else {
                Err(Error::InvalidArgument(format!(
                    "profile '{name}': {what} '{value}' not in {allowed:?}"
                )))
            }
        };
        field("general.color", &p.general.color, COLORS)?;
        field("tui.theme", &p.tui.theme, THEMES)?;
        field("logs.level", &p.logs.level, LOG_LEVELS)?;
        field("shell.completion_shell", &p.shell.completion_shell, SHELLS)?;
        field("ai.provider", &p.ai.provider, PROVIDERS)?;
        if p.ai.soft_limit_percent > 100 {
            return Err(Error::InvalidArgument(format!(
                "profile '{name}': ai.soft_limit_percent must be <= 100"
            )));
        }
        if p.ai.hard_budget_usd < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "profile '{name}': ai.hard_budget_usd must be >= 0"
            )));
        }
        if p.performance.read_timeout_secs == 0 || p.performance.topology_timeout_secs == 0 {
            return Err(Error::InvalidArgument(format!(
                "profile '{name}': timeouts must be non-zero"
            )));
        }
    }
    Ok(())
}

/// De-duplicates and trims list fields, lower-cases enumerated values.
pub fn normalize(root: &mut ConfigRoot) {
    for p in root.profiles.values_mut() {
        p.general.color = p.general.color.trim().to_lowercase();
        p.tui.theme = p.tui.theme.trim().to_lowercase();
        p.logs.level = p.logs.level.trim().to_lowercase();
        p.shell.completion_shell = p.shell.completion_shell.trim().to_lowercase();
        p.ai.provider = p.ai.provider.trim().to_lowercase();
        dedupe_trim(&mut p.secret_keys);
        dedupe_trim(&mut p.context.kubeconfig_paths);
    }
}

fn dedupe_trim(list: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    list.iter_mut().for_each(|s| *s = s.trim().to_string());
    list.retain(|s| !s.is_empty() && seen.insert(s.clone()));
}

/// Loads, saves and mutates the profile store.
pub struct ConfigStore {
    path: PathBuf,
    secrets: Arc<dyn SecretStore>,
}

impl ConfigStore {
    pub fn new(path: PathBuf, secrets: Arc<dyn SecretStore>) -> Self {
        Self { path, secrets }
    }

    /// Store under the per-user config dir (`~/.config/kcli/config.yaml`).
    pub fn default_location(secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Internal("no user config directory".into()))?
            .join("kcli");
        Ok(Self::new(dir.join(CONFIG_FILE), secrets))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full document, materializing defaults on first run. Secret-bound keys
    /// are hydrated from the OS secret store.
    pub fn load_root(&self) -> Result<ConfigRoot> {
        let mut root = if self.path.exists() {
            let content = fs::read_to_string(&self.path)?;
            serde_yaml::from_str(&content)?
        } else {
            let root = ConfigRoot::default();
            self.write_root(&root)?;
            root
        };
        normalize(&mut root);
        validate(&root)?;
        let names: Vec<String> = root.profiles.keys().cloned().collect();
        for name in names {
            self.hydrate_secrets(&name, root.profiles.get_mut(&name).unwrap())?;
        }
        Ok(root)
    }

    /// Active profile view, defaults applied.
    pub fn load(&self) -> Result<Profile> {
        let root = self.load_root()?;
        Ok(root.profiles[&root.active_profile].clone())
    }

    /// Validates, pushes secret-bound values to the keychain, zeroes them in
    /// the DTO and writes atomically.
    pub fn save_root(&self, root: &ConfigRoot) -> Result<()> {
        let mut on_disk = root.clone();
        normalize(&mut on_disk);
        validate(&on_disk)?;
        let names: Vec<String> = on_disk.profiles.keys().cloned().collect();
        for name in names {
            self.elide_secrets(&name, on_disk.profiles.get_mut(&name).unwrap())?;
        }
        self.write_root(&on_disk)
    }

    /// Replaces the active profile and saves.
    pub fn save(&self, profile: Profile) -> Result<()> {
        let mut root = self.load_root()?;
        let active = root.active_profile.clone();
        root.profiles.insert(active, profile);
        self.save_root(&root)
    }

    /// Atomically repoints the active profile.
    pub fn switch_profile(&self, name: &str) -> Result<()> {
        let mut root = self.load_root()?;
        if !root.profiles.contains_key(name) {
            return Err(Error::NotFound(format!("profile '{name}'")));
        }
        root.active_profile = name.to_string();
        self.save_root(&root)
    }

    /// Dotted-path read on the active profile (e.g. `tui.theme`).
    pub fn get_by_key(&self, key: &str) -> Result<serde_json::Value> {
        let profile = self.load()?;
        let value = serde_json::to_value(&profile)?;
        lookup_path(&value, key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("config key '{key}'")))
    }

    /// Dotted-path write on the active profile. The new value is parsed as
    /// YAML so `true`, `5` and plain strings all do what they look like.
    pub fn set_by_key(&self, key: &str, raw: &str) -> Result<()> {
        let profile = self.load()?;
        let mut value = serde_json::to_value(&profile)?;
        let parsed: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let parsed = serde_json::to_value(parsed)?;
        set_path(&mut value, key, parsed)?;
        let updated: Profile = serde_json::from_value(value)
            .map_err(|e| Error::InvalidArgument(format!("config key '{key}': {e}")))?;
        self.save(updated)
    }

    fn hydrate_secrets(&self, profile_name: &str, profile: &mut Profile) -> Result<()> {
        let keys = profile.secret_keys.clone();
        let mut value = serde_json::to_value(&*profile)?;
        for key in &keys {
            let is_blank = lookup_path(&value, key)
                .and_then(|v| v.as_str())
                .map(|s| s.is_empty())
                .unwrap_or(false);
            if !is_blank {
                continue;
            }
            if let Some(secret) = self.secrets.get(&format!("{profile_name}.{key}"))? {
                set_path(&mut value, key, serde_json::Value::String(secret))?;
            }
        }
        *profile = serde_json::from_value(value)?;
        Ok(())
    }

    fn elide_secrets(&self, profile_name: &str, profile: &mut Profile) -> Result<()> {
        let keys = profile.secret_keys.clone();
        let mut value = serde_json::to_value(&*profile)?;
        for key in &keys {
            let current = lookup_path(&value, key)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let Some(secret) = current {
                if !secret.is_empty() {
                    self.secrets.set(&format!("{profile_name}.{key}"), &secret)?;
                }
                set_path(&mut value, key, serde_json::Value::String(String::new()))?;
            }
        }
        *profile = serde_json::from_value(value)?;
        Ok(())
    }

    fn write_root(&self, root: &ConfigRoot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            restrict_dir(parent)?;
        }
        let content = serde_yaml::to_string(root)?;
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, content)?;
        restrict_file(&tmp)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}

fn lookup_path<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    let mut cur = value;
    for part in key.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn set_path(value: &mut serde_json::Value, key: &str, new: serde_json::Value) -> Result<()> {
    let mut cur = value;
    let parts: Vec<&str> = key.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            let obj = cur
                .as_object_mut()
                .ok_or_else(|| Error::InvalidArgument(format!("config key '{key}'")))?;
            if !obj.contains_key(*part) {
                return Err(Error::NotFound(format!("config key '{key}'")));
            }
            obj.insert(part.to_string(), new);
            return Ok(());
        }
        cur = cur
            .get_mut(*part)
            .ok_or_else(|| Error::NotFound(format!("config key '{key}'")))?;
    }
    Err(Error::InvalidArgument(format!("empty config key '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;
    use tempfile::tempdir;

    fn store(dir: &Path) -> (ConfigStore, Arc<MemorySecretStore>) {
        let secrets = Arc::new(MemorySecretStore::default());
        (
            ConfigStore::new(dir.join("config.yaml"), secrets.clone()),
            secrets,
        )
    }

    #[test]
    fn first_run_materializes_defaults() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let profile = store.load().unwrap();
        assert!(profile.general.confirm_mutations);
        assert_eq!(profile.tui.theme, "dark");
        assert!(store.path().exists());
    }

    #[test]
    fn save_load_round_trip_is_identity() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let mut profile = store.load().unwrap();
        profile.tui.refresh_seconds = 9;
        profile.context.default_namespace = "payments".into();
        profile.ai.api_key = "sk-secret".into();
        store.save(profile.clone()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn keychain_bound_value_never_hits_disk() {
        let dir = tempdir().unwrap();
        let (store, secrets) = store(dir.path());
        let mut profile = store.load().unwrap();
        profile.ai.api_key = "sk-secret".into();
        store.save(profile).unwrap();

        let on_disk = fs::read_to_string(store.path()).unwrap();
        assert!(!on_disk.contains("sk-secret"));
        assert_eq!(
            secrets.get("default.ai.api_key").unwrap().as_deref(),
            Some("sk-secret")
        );
        // And the in-memory view still sees it.
        assert_eq!(store.load().unwrap().ai.api_key, "sk-secret");
    }

    #[test]
    fn normalization_dedupes_and_lowercases() {
        let mut root = ConfigRoot::default();
        let p = root.profiles.get_mut("default").unwrap();
        p.general.color = " AUTO ".into();
        p.secret_keys = vec![
            " ai.api_key ".into(),
            "ai.api_key".into(),
            String::new(),
        ];
        normalize(&mut root);
        let p = &root.profiles["default"];
        assert_eq!(p.general.color, "auto");
        assert_eq!(p.secret_keys, vec!["ai.api_key".to_string()]);
    }

    #[test]
    fn validation_rejects_unknown_enum() {
        let mut root = ConfigRoot::default();
        root.profiles.get_mut("default").unwrap().tui.theme = "solarized".into();
        assert!(matches!(
            validate(&root),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn validation_rejects_missing_active_profile() {
        let mut root = ConfigRoot::default();
        root.active_profile = "staging".into();
        assert!(validate(&root).is_err());
    }

    #[test]
    fn dotted_path_get_set() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        store.load().unwrap();
        store.set_by_key("tui.refresh_seconds", "12").unwrap();
        assert_eq!(
            store.get_by_key("tui.refresh_seconds").unwrap(),
            serde_json::json!(12)
        );
        assert!(store.set_by_key("tui.unknown", "1").is_err());
        assert!(store.set_by_key("tui.theme", "solarized").is_err());
    }

    #[test]
    fn switch_profile_updates_pointer() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let mut root = store.load_root().unwrap();
        root.profiles.insert("staging".into(), Profile::default());
        store.save_root(&root).unwrap();
        store.switch_profile("staging").unwrap();
        assert_eq!(store.load_root().unwrap().active_profile, "staging");
        assert!(store.switch_profile("missing").is_err());
    }
}
