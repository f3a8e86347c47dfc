//! Kubernetes-backed workload directory and policy store.
//!
//! Pods and network policies are read through the API server on every call and decoded once into
//! the evaluator's model. Nothing is cached or watched.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod network_policy;
mod pod;


pub use self::{network_policy::policy, pod::workload};

use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use netpol_reach_core::{Policy, PolicyStore, Selector, Workload, WorkloadDirectory};
use netpol_reach_k8s_api::{NetworkPolicy, Pod};
use tracing::{debug, instrument};

/// Reads workloads and policies from a cluster.
#[derive(Clone)]
pub struct Cluster {
    client: kube::Client,
}

// === impl Cluster ===

impl Cluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn network_policies(&self, namespace: &str) -> Api<NetworkPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl From<kube::Client> for Cluster {
    fn from(client: kube::Client) -> Self {
        Self::new(client)
    }
}

#[async_trait::async_trait]
impl WorkloadDirectory for Cluster {
    #[instrument(skip(self))]
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Workload>> {
        let pod = self
            .pods(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get pod {namespace}/{name}"))?;
        pod.map(workload).transpose()
    }

    #[instrument(skip(self, selector), fields(selector = %selector))]
    async fn list_by_selector(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Workload>> {
        let pods = self
            .pods(namespace)
            .list(&list_params(selector))
            .await
            .with_context(|| format!("failed to list pods in {namespace}"))?;
        debug!(pods = pods.items.len(), "Listed pods");
        pods.items.into_iter().map(workload).collect()
    }
}

#[async_trait::async_trait]
impl PolicyStore for Cluster {
    #[instrument(skip(self))]
    async fn list_in_namespace(&self, namespace: &str) -> Result<Vec<Policy>> {
        let policies = self
            .network_policies(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list network policies in {namespace}"))?;
        debug!(policies = policies.items.len(), "Listed network policies");
        policies.items.into_iter().map(policy).collect()
    }

    #[instrument(skip(self))]
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Policy>> {
        let np = self
            .network_policies(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get network policy {namespace}/{name}"))?;
        np.map(policy).transpose()
    }
}

/// Renders a selector as a label selector query. An empty selector lists everything.
fn list_params(selector: &Selector) -> ListParams {
    let params = ListParams::default();
    if selector.is_empty() {
        return params;
    }
    params.labels(&selector.to_string())
}
