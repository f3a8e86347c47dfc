use crate::{Policy, Workload};
use anyhow::Result;
use netpol_reach_k8s_api::Selector;

/// Looks up workloads.
///
/// A workload that does not exist is `Ok(None)`; errors are reserved for failures of the backing
/// store and are passed through to the caller without retries.
#[async_trait::async_trait]
pub trait WorkloadDirectory: Send + Sync {
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Workload>>;

    async fn list_by_selector(&self, namespace: &str, selector: &Selector)
        -> Result<Vec<Workload>>;
}

/// Looks up network policies.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_in_namespace(&self, namespace: &str) -> Result<Vec<Policy>>;

    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Policy>>;
}
