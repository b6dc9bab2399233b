//! Plugin host: discovery, manifest validation, allow-list gating and
//! execution with a curated environment.
//!
//! A plugin is an executable plus a YAML manifest of the same stem in the
//! plugin directory. Executables outside that directory are refused unless
//! `KCLI_ALLOW_PATH_PLUGINS=1`.

use crate::runtime::Runtime;
use kcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const PATH_PLUGINS_ENV: &str = "KCLI_ALLOW_PATH_PLUGINS";

/// Environment variables a plugin inherits; everything else is dropped.
const CURATED_ENV: &[&str] = &[
    "PATH", "HOME", "USER", "LANG", "TERM", "KUBECONFIG", "NO_COLOR",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl PluginManifest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("plugin manifest has no name".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidArgument(format!(
                "plugin name '{}' has invalid characters",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "plugin '{}' has no version",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub executable: PathBuf,
    pub allowed: bool,
}

pub struct PluginHost {
    dir: PathBuf,
}

impl PluginHost {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Internal("no user config directory".into()))?
            .join("kcli")
            .join("plugins");
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scans the plugin directory; manifests failing validation are skipped
    /// with a log line, never fatal.
    pub fn discover(&self, rt: &Runtime) -> Result<Vec<DiscoveredPlugin>> {
        let mut plugins = Vec::new();
        if !self.dir.exists() {
            return Ok(plugins);
        }
        let state = rt.state_store.load()?;
        for entry in WalkDir::new(&self.dir).max_depth(1) {
            let entry = entry.map_err(|e| Error::Internal(format!("plugin scan: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let manifest: PluginManifest = match std::fs::read_to_string(path)
                .map_err(Error::from)
                .and_then(|text| serde_yaml::from_str(&text).map_err(Error::from))
            {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(target: "kcli::plugins", path = %path.display(), error = %e, "manifest rejected");
                    continue;
                }
            };
            if let Err(e) = manifest.validate() {
                tracing::warn!(target: "kcli::plugins", path = %path.display(), error = %e, "manifest rejected");
                continue;
            }
            let executable = path.with_extension("");
            if !executable.exists() {
                tracing::warn!(
                    target: "kcli::plugins",
                    path = %path.display(),
                    "manifest without executable"
                );
                continue;
            }
            let allowed = state.is_plugin_allowed(&manifest.name);
            plugins.push(DiscoveredPlugin {
                manifest,
                executable,
                allowed,
            });
        }
        plugins.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        Ok(plugins)
    }

    pub fn find(&self, rt: &Runtime, name: &str) -> Result<DiscoveredPlugin> {
        self.discover(rt)?
            .into_iter()
            .find(|p| p.manifest.name == name || p.manifest.aliases.contains(name))
            .ok_or_else(|| Error::NotFound(format!("plugin '{name}'")))
    }

    /// Copies `<path>` and its sibling `<path>.yaml` manifest into the
    /// plugin directory.
    pub fn install(&self, source: &Path) -> Result<PluginManifest> {
        let manifest_path = source.with_extension("yaml");
        let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
            Error::InvalidArgument(format!("manifest {}: {e}", manifest_path.display()))
        })?;
        let manifest: PluginManifest = serde_yaml::from_str(&text)?;
        manifest.validate()?;
        std::fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(&manifest.name);
        std::fs::copy(source, &target)?;
        std::fs::copy(&manifest_path, self.dir.join(format!("{}.yaml", manifest.name)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(manifest)
    }

    pub fn remove(&self, rt: &Runtime, name: &str) -> Result<()> {
        let plugin = self.find(rt, name)?;
        std::fs::remove_file(&plugin.executable)?;
        let manifest = plugin.executable.with_extension("yaml");
        if manifest.exists() {
            std::fs::remove_file(manifest)?;
        }
        rt.state_store.update(|s| s.revoke_plugin(name))?;
        Ok(())
    }

    /// Executes an allowed plugin with the curated environment. Built-ins
    /// shadow plugins at the dispatcher, so this is only reached for real
    /// plugin names.
    pub async fn run(&self, rt: &Runtime, name: &str, args: &[String]) -> Result<i32> {
        let plugin = match self.find(rt, name) {
            Ok(plugin) => plugin,
            Err(Error::NotFound(_)) if path_plugins_enabled() => {
                return self.run_path_plugin(name, args).await;
            }
            Err(e) => return Err(e),
        };
        if !plugin.allowed {
            return Err(Error::FailedPrecondition(format!(
                "plugin '{name}' is not allowed; run `kcli plugin allow {name}`"
            )));
        }
        self.spawn(&plugin.executable, args).await
    }

    async fn run_path_plugin(&self, name: &str, args: &[String]) -> Result<i32> {
        let program = format!("kcli-{name}");
        tracing::warn!(
            target: "kcli::plugins",
            plugin = name,
            "running PATH plugin ({PATH_PLUGINS_ENV} is set)"
        );
        self.spawn(Path::new(&program), args).await
    }

    async fn spawn(&self, program: &Path, args: &[String]) -> Result<i32> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).env_clear();
        for key in CURATED_ENV {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        let status = command
            .status()
            .await
            .map_err(|e| Error::Internal(format!("plugin {}: {e}", program.display())))?;
        Ok(if status.success() { 0 } else { 2 })
    }
}

fn path_plugins_enabled() -> bool {
    std::env::var(PATH_PLUGINS_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{GlobalFlags, Output, Runtime};
    use kcli_core::{ConfigStore, MemorySecretStore, StateStore};
    use std::sync::Arc;

    fn runtime(dir: &Path) -> Runtime {
        let config_store = ConfigStore::new(
            dir.join("config.yaml"),
            Arc::new(MemorySecretStore::default()),
        );
        config_store.load().unwrap();
        Runtime::with_stores(
            GlobalFlags::default(),
            Output::custom(Box::new(std::io::sink()), Box::new(std::io::sink())),
            config_store,
            StateStore::new(dir.join("state.json")),
        )
        .unwrap()
    }

    fn write_plugin(dir: &Path, name: &str, manifest_yaml: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), "#!/bin/sh\necho hi\n").unwrap();
        std::fs::write(dir.join(format!("{name}.yaml")), manifest_yaml).unwrap();
    }

    #[test]
    fn discovery_validates_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("plugins");
        let rt = runtime(tmp.path());
        write_plugin(
            &plugin_dir,
            "whoami",
            "name: whoami\nversion: \"1.0\"\ndescription: prints identity\n",
        );
        write_plugin(&plugin_dir, "broken", "name: ''\nversion: ''\n");

        let host = PluginHost::new(plugin_dir);
        let plugins = host.discover(&rt).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].manifest.name, "whoami");
        assert!(!plugins[0].allowed);
    }

    #[test]
    fn allow_state_comes_from_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("plugins");
        let rt = runtime(tmp.path());
        write_plugin(&plugin_dir, "whoami", "name: whoami\nversion: \"1.0\"\n");
        rt.state_store.update(|s| s.allow_plugin("whoami")).unwrap();

        let host = PluginHost::new(plugin_dir);
        let plugin = host.find(&rt, "whoami").unwrap();
        assert!(plugin.allowed);
    }

    #[tokio::test]
    async fn disallowed_plugin_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("plugins");
        let rt = runtime(tmp.path());
        write_plugin(&plugin_dir, "whoami", "name: whoami\nversion: \"1.0\"\n");
        let host = PluginHost::new(plugin_dir);
        let out = host.run(&rt, "whoami", &[]).await;
        assert!(matches!(out, Err(Error::FailedPrecondition(_))));
    }

    #[test]
    fn alias_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("plugins");
        let rt = runtime(tmp.path());
        write_plugin(
            &plugin_dir,
            "whoami",
            "name: whoami\nversion: \"1.0\"\naliases: [me]\n",
        );
        let host = PluginHost::new(plugin_dir);
        assert!(host.find(&rt, "me").is_ok());
        assert!(host.find(&rt, "nobody").is_err());
    }
}
