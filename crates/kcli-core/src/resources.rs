//! Resource access layer: every read or mutation against a cluster goes
//! through here, under the cluster's rate limiter, circuit breaker, a capped
//! deadline, taxonomy error mapping and (for idempotent reads) bounded
//! jittered retries.

use crate::client::ClusterClient;
use crate::error::{with_retries, Error, Result, RetryPolicy};
use crate::kinds::{ResourceKind, ResourceRef};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{
    AttachParams, AttachedProcess, DeleteParams, DynamicObject, ListParams, LogParams, Patch,
    PatchParams,
};
use kube::core::ApiResource;
use kube::Api;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub const FIELD_MANAGER: &str = "kcli";

#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl AccessPolicy {
    /// Caps the configured ceiling by the caller's remaining deadline.
    pub fn read_deadline(&self, caller: Option<Duration>) -> Duration {
        match caller {
            Some(d) => d.min(self.read_timeout),
            None => self.read_timeout,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<DynamicObject>,
    pub continue_token: Option<String>,
}

/// Scoped access to one cluster.
pub struct ResourceAccess {
    cluster_id: String,
    client: Arc<ClusterClient>,
    policy: AccessPolicy,
}

impl ResourceAccess {
    pub fn new(cluster_id: &str, client: Arc<ClusterClient>, policy: AccessPolicy) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            client,
            policy,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn dynamic_api(&self, ar: &ApiResource, namespaced: bool, ns: Option<&str>) -> Api<DynamicObject> {
        match (namespaced, ns) {
            (true, Some(ns)) => Api::namespaced_with(self.client.kube(), ns, ar),
            _ => Api::all_with(self.client.kube(), ar),
        }
    }

    /// Resolves a kind name to its API resource: the static table for known
    /// kinds, the discovery cache for everything else.
    fn resolve(&self, kind: &str) -> Result<(ApiResource, bool)> {
        if let Ok(known) = ResourceKind::parse(kind) {
            return Ok((ClusterClient::static_resource(known), known.is_namespaced()));
        }
        self.client
            .discovery()
            .resolve(kind)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("kind '{kind}' not served by this cluster")))
    }

    /// Gated, deadline-capped, retried read.
    async fn run_read<T, F, Fut>(&self, deadline: Duration, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = kube::Result<T>>,
    {
        with_retries(self.policy.retry, || {
            let fut = op();
            async {
                self.client.admit().await?;
                let out = tokio::time::timeout(deadline, fut)
                    .await
                    .map_err(|_| Error::DeadlineExceeded(format!("read exceeded {deadline:?}")))?;
                self.settle(out.map_err(Error::from))
            }
        })
        .await
    }

    /// Gated, deadline-capped mutation. Never retried.
    async fn run_write<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = kube::Result<T>>,
    {
        self.client.admit().await?;
        let out = tokio::time::timeout(self.policy.write_timeout, fut)
            .await
            .map_err(|_| {
                Error::DeadlineExceeded(format!("write exceeded {:?}", self.policy.write_timeout))
            })?;
        self.settle(out.map_err(Error::from))
    }

    /// Feeds the breaker from real call outcomes, not only probes.
    fn settle<T>(&self, out: Result<T>) -> Result<T> {
        match &out {
            Ok(_) => self.client.breaker().record_success(),
            Err(e) if e.is_retryable() => self.client.breaker().record_failure(),
            Err(_) => {}
        }
        out
    }

    /// One page of a list; pass back `continue_token` for the next.
    pub async fn list(&self, kind: &str, query: &ListQuery) -> Result<ListPage> {
        let (ar, namespaced) = self.resolve(kind)?;
        if !namespaced && query.namespace.is_some() {
            return Err(Error::InvalidArgument(format!(
                "kind '{kind}' is cluster-scoped, namespace does not apply"
            )));
        }
        let api = self.dynamic_api(&ar, namespaced, query.namespace.as_deref());
        let mut lp = ListParams::default();
        if let Some(sel) = &query.label_selector {
            lp = lp.labels(sel);
        }
        if let Some(sel) = &query.field_selector {
            lp = lp.fields(sel);
        }
        if let Some(limit) = query.limit {
            lp = lp.limit(limit);
        }
        if let Some(token) = &query.continue_token {
            lp = lp.continue_token(token);
        }
        let deadline = self.policy.read_timeout;
        let list = self
            .run_read(deadline, || {
                let api = api.clone();
                let lp = lp.clone();
                async move { api.list(&lp).await }
            })
            .await?;
        Ok(ListPage {
            continue_token: list.metadata.continue_.clone().filter(|t| !t.is_empty()),
            items: list.items,
        })
    }

    /// Follows continue tokens until exhausted.
    pub async fn list_all(&self, kind: &str, query: &ListQuery) -> Result<Vec<DynamicObject>> {
        let mut out = Vec::new();
        let mut q = query.clone();
        loop {
            let page = self.list(kind, &q).await?;
            out.extend(page.items);
            match page.continue_token {
                Some(token) => q.continue_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    /// Typed list with continue-token pagination, namespaced or cluster-wide.
    pub async fn list_typed<K>(&self, namespace: Option<&str>) -> Result<Vec<K>>
    where
        K: kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.kube(), ns),
            None => Api::all(self.client.kube()),
        };
        self.paginate(api).await
    }

    /// Typed list for cluster-scoped kinds (Node, PV, StorageClass, Namespace).
    pub async fn list_typed_cluster<K>(&self) -> Result<Vec<K>>
    where
        K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::all(self.client.kube());
        self.paginate(api).await
    }

    async fn paginate<K>(&self, api: Api<K>) -> Result<Vec<K>>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let mut items: Vec<K> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let lp = match &token {
                Some(t) => ListParams::default().limit(500).continue_token(t),
                None => ListParams::default().limit(500),
            };
            let page = self
                .run_read(self.policy.read_timeout, || {
                    let api = api.clone();
                    let lp = lp.clone();
                    async move { api.list(&lp).await }
                })
                .await?;
            token = page.metadata.continue_.clone().filter(|t| !t.is_empty());
            items.extend(page.items);
            if token.is_none() {
                return Ok(items);
            }
        }
    }

    pub async fn get(&self, kind: &str, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        let (ar, namespaced) = self.resolve(kind)?;
        if namespaced && namespace.is_none() {
            return Err(Error::InvalidArgument(format!(
                "kind '{kind}' is namespaced, a namespace is required"
            )));
        }
        let api = self.dynamic_api(&ar, namespaced, namespace);
        let name = name.to_string();
        self.run_read(self.policy.read_timeout, || {
            let api = api.clone();
            let name = name.clone();
            async move { api.get(&name).await }
        })
        .await
    }

    /// Server-side apply of a single YAML document.
    pub async fn apply(&self, yaml: &str) -> Result<DynamicObject> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidArgument(format!("yaml parse: {e}")))?;
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| Error::InvalidArgument("document has no kind".into()))?
            .to_string();
        let obj: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::InvalidArgument(format!("object shape: {e}")))?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidArgument("document has no metadata.name".into()))?;
        let (ar, namespaced) = self.resolve(&kind)?;
        if namespaced && obj.metadata.namespace.is_none() {
            return Err(Error::InvalidArgument(format!(
                "kind '{kind}' is namespaced, metadata.namespace is required"
            )));
        }
        let api = self.dynamic_api(&ar, namespaced, obj.metadata.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.run_write(async move { api.patch(&name, &params, &Patch::Apply(&obj)).await })
            .await
    }

    pub async fn delete(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<()> {
        let (ar, namespaced) = self.resolve(kind)?;
        if namespaced && namespace.is_none() {
            return Err(Error::InvalidArgument(format!(
                "kind '{kind}' is namespaced, a namespace is required"
            )));
        }
        let api = self.dynamic_api(&ar, namespaced, namespace);
        let params = DeleteParams {
            grace_period_seconds: grace_period,
            ..Default::default()
        };
        let name = name.to_string();
        self.run_write(async move { api.delete(&name, &params).await })
            .await
            .map(|_| ())
    }

    /// Recent events, namespace-scoped or cluster-wide.
    pub async fn events(&self, namespace: Option<&str>) -> Result<Vec<Event>> {
        let api: Api<Event> = match namespace {
            Some(ns) => Api::namespaced(self.client.kube(), ns),
            None => Api::all(self.client.kube()),
        };
        self.paginate(api).await
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.kube(), namespace);
        let lp = LogParams {
            container,
            tail_lines,
            timestamps: true,
            ..Default::default()
        };
        let pod = pod.to_string();
        self.run_read(self.policy.read_timeout, || {
            let api = api.clone();
            let lp = lp.clone();
            let pod = pod.clone();
            async move { api.logs(&pod, &lp).await }
        })
        .await
    }

    /// Follow-mode log line stream for the gateway's tail endpoint and the TUI.
    pub async fn pod_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        tail_lines: Option<i64>,
    ) -> Result<impl futures::Stream<Item = std::io::Result<String>> + Send> {
        use futures::AsyncBufReadExt;
        self.client.admit().await?;
        let api: Api<Pod> = Api::namespaced(self.client.kube(), namespace);
        let lp = LogParams {
            container,
            tail_lines,
            follow: true,
            ..Default::default()
        };
        let stream = api.log_stream(pod, &lp).await.map_err(Error::from)?;
        self.settle(Ok(()))?;
        Ok(Box::pin(stream).lines())
    }

    /// Interactive exec with a TTY; the returned process is owned by the
    /// session and must be aborted on disconnect.
    pub async fn pod_exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        command: Vec<String>,
    ) -> Result<AttachedProcess> {
        self.client.admit().await?;
        let api: Api<Pod> = Api::namespaced(self.client.kube(), namespace);
        let mut params = AttachParams::interactive_tty();
        if let Some(c) = container {
            params = params.container(c);
        }
        let command = if command.is_empty() {
            vec!["/bin/sh".to_string()]
        } else {
            command
        };
        let proc = api
            .exec(pod, command, &params)
            .await
            .map_err(Error::from)?;
        self.settle(Ok(()))?;
        Ok(proc)
    }

    /// Reference for an object returned by this cluster.
    pub fn reference(&self, obj: &DynamicObject, kind: &str) -> ResourceRef {
        let (group, version) = obj
            .types
            .as_ref()
            .map(|t| split_api_version(&t.api_version))
            .unwrap_or_default();
        ResourceRef {
            cluster: self.cluster_id.clone(),
            group,
            version,
            kind: kind.to_string(),
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            uid: obj.metadata.uid.clone().unwrap_or_default(),
        }
    }
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_split() {
        assert_eq!(
            split_api_version("networking.k8s.io/v1"),
            ("networking.k8s.io".to_string(), "v1".to_string())
        );
        assert_eq!(split_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn read_deadline_is_capped_by_caller() {
        let policy = AccessPolicy::default();
        assert_eq!(
            policy.read_deadline(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.read_deadline(Some(Duration::from_secs(60))),
            Duration::from_secs(15)
        );
        assert_eq!(policy.read_deadline(None), Duration::from_secs(15));
    }
}
