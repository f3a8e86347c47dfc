use crate::core::{
    governing, matching_policies, policy_allows, Direction, ExposedPort, Labels, Peer, Policy,
    PortQuery, Selector, Workload,
};
use serde::Serialize;
use std::net::IpAddr;

/// Describes a workload along with the policies that select it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub addresses: Vec<IpAddr>,
    pub ports: Vec<ExposedPort>,

    /// All policies whose selector matches the workload.
    pub policies: Vec<String>,

    pub ingress_policies: Vec<String>,
    pub egress_policies: Vec<String>,
}

/// Whether a single policy permits a peer on a port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub policy: String,
    pub namespace: String,
    pub direction: Direction,
    pub query: PortQuery,
    pub peer: Peer,

    /// False when the policy does not govern `direction`, in which case it neither permits nor
    /// denies anything.
    pub governs: bool,

    pub allowed: bool,
}

// === impl WorkloadSummary ===

impl WorkloadSummary {
    pub fn new(workload: Workload, policies: &[Policy]) -> Self {
        let matched = matching_policies(&workload, policies);
        let Workload {
            name,
            namespace,
            labels,
            addresses,
            ports,
        } = workload;
        Self {
            policies: matched.iter().map(|p| p.name.clone()).collect(),
            ingress_policies: governing(&matched, Direction::Ingress),
            egress_policies: governing(&matched, Direction::Egress),
            name,
            namespace,
            labels,
            addresses,
            ports,
        }
    }
}

// === impl PolicyCheck ===

impl PolicyCheck {
    /// Checks `policy` for a `direction` clause that permits the workloads selected by `peer`.
    pub fn new(policy: &Policy, direction: Direction, query: PortQuery, peer: Selector) -> Self {
        let peer = Peer::Workloads(peer);
        Self {
            policy: policy.name.clone(),
            namespace: policy.namespace.clone(),
            direction,
            governs: policy.governs(direction),
            allowed: policy_allows(policy, direction, &query, &peer),
            query,
            peer,
        }
    }
}
