//! Shared command runtime: active profile, persisted state, cluster access
//! and the output sinks (real stdio or capture buffers for the programmatic
//! API).

use kcli_core::{
    AccessPolicy, ClientLimits, ClusterClient, ConfigStore, ConnectionDescriptor, Error,
    OsSecretStore, Profile, ResourceAccess, Result, RetryPolicy, SecretStore, StateStore,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Global flags shared by every built-in.
#[derive(Debug, Clone, Default)]
pub struct GlobalFlags {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub ai_timeout: Option<u64>,
    pub completion_timeout: Option<u64>,
    pub yes: bool,
    pub force: bool,
}

impl GlobalFlags {
    pub fn bypass_confirmation(&self) -> bool {
        self.yes || self.force
    }
}

/// Where command output goes. The programmatic API swaps these for capture
/// buffers; the binary uses real stdio.
#[derive(Clone)]
pub struct Output {
    stdout: Arc<Mutex<Box<dyn Write + Send>>>,
    stderr: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Output {
    pub fn stdio() -> Self {
        Self {
            stdout: Arc::new(Mutex::new(Box::new(std::io::stdout()))),
            stderr: Arc::new(Mutex::new(Box::new(std::io::stderr()))),
        }
    }

    pub fn custom(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    pub fn out(&self, line: impl AsRef<str>) {
        let mut sink = self.stdout.lock().unwrap();
        let _ = writeln!(sink, "{}", line.as_ref());
        let _ = sink.flush();
    }

    pub fn err(&self, line: impl AsRef<str>) {
        let mut sink = self.stderr.lock().unwrap();
        let _ = writeln!(sink, "{}", line.as_ref());
        let _ = sink.flush();
    }
}

pub struct Runtime {
    pub profile: Profile,
    pub config_store: ConfigStore,
    pub state_store: StateStore,
    pub globals: GlobalFlags,
    pub output: Output,
}

impl Runtime {
    /// Loads stores from their default locations with the OS keychain.
    pub fn load(globals: GlobalFlags, output: Output) -> Result<Self> {
        let secrets: Arc<dyn SecretStore> = Arc::new(OsSecretStore);
        let config_store = ConfigStore::default_location(secrets)?;
        let profile = config_store.load()?;
        let state_store = StateStore::default_location()?;
        Ok(Self {
            profile,
            config_store,
            state_store,
            globals,
            output,
        })
    }

    /// Test construction against explicit paths.
    pub fn with_stores(
        globals: GlobalFlags,
        output: Output,
        config_store: ConfigStore,
        state_store: StateStore,
    ) -> Result<Self> {
        let profile = config_store.load()?;
        Ok(Self {
            profile,
            config_store,
            state_store,
            globals,
            output,
        })
    }

    /// Effective context: flag wins over profile default, empty means the
    /// kubeconfig's current context.
    pub fn context(&self) -> Option<String> {
        self.globals
            .context
            .clone()
            .or_else(|| {
                let c = self.profile.context.default_context.clone();
                (!c.is_empty()).then_some(c)
            })
    }

    pub fn namespace(&self) -> Option<String> {
        self.globals
            .namespace
            .clone()
            .or_else(|| {
                let ns = self.profile.context.default_namespace.clone();
                (!ns.is_empty()).then_some(ns)
            })
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            kubeconfig: self.globals.kubeconfig.clone(),
            context: self.context(),
            in_cluster: false,
        }
        .normalize()
    }

    fn access_policy(&self) -> AccessPolicy {
        AccessPolicy {
            read_timeout: Duration::from_secs(self.profile.performance.read_timeout_secs),
            write_timeout: Duration::from_secs(self.profile.performance.topology_timeout_secs),
            retry: RetryPolicy::default(),
        }
    }

    /// One-shot direct connection for the effective context, with failure
    /// memory updated either way.
    pub async fn access(&self) -> Result<Arc<ResourceAccess>> {
        self.access_for(self.descriptor()).await
    }

    pub async fn access_for(&self, descriptor: ConnectionDescriptor) -> Result<Arc<ResourceAccess>> {
        let label = descriptor.display_name();
        match ClusterClient::connect(&descriptor, ClientLimits::default()).await {
            Ok(client) => {
                let _ = self.state_store.update(|s| s.clear_failure(&label));
                Ok(Arc::new(ResourceAccess::new(
                    &label,
                    Arc::new(client),
                    self.access_policy(),
                )))
            }
            Err(e) => {
                let _ = self
                    .state_store
                    .update(|s| s.record_failure(&label, &e.to_string()));
                Err(e)
            }
        }
    }

    /// Interactive confirmation for mutating actions; honours `--yes` and
    /// `--force`, and the profile's confirm_mutations switch.
    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.globals.bypass_confirmation() || !self.profile.general.confirm_mutations {
            return Ok(true);
        }
        self.output.err(format!("{prompt} [y/N]"));
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| Error::Internal(format!("reading confirmation: {e}")))?;
        Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    /// Contexts named in the effective kubeconfig(s).
    pub fn known_contexts(&self) -> Result<Vec<String>> {
        let kubeconfig = match &self.globals.kubeconfig {
            Some(path) => kube::config::Kubeconfig::read_from(path)
                .map_err(|e| Error::InvalidArgument(format!("kubeconfig {path:?}: {e}")))?,
            None => kube::config::Kubeconfig::read()
                .map_err(|e| Error::InvalidArgument(format!("kubeconfig: {e}")))?,
        };
        Ok(kubeconfig
            .contexts
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }
}
