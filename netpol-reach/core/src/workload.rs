use crate::{policy::Peer, Protocol};
use netpol_reach_k8s_api::{Labels, Selector};
use serde::Serialize;
use std::net::IpAddr;

/// A snapshot of an addressable workload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,

    /// Addresses assigned to the workload, primary first. Empty until the workload is scheduled.
    pub addresses: Vec<IpAddr>,

    pub ports: Vec<ExposedPort>,
}

/// A port declared by one of a workload's containers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExposedPort {
    pub container: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Identifies a workload together with the selector that was used to find it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub selector: Selector,
}

// === impl Workload ===

impl Workload {
    /// Returns the first container port that matches `port` and `protocol`.
    pub fn exposed_port(&self, port: u16, protocol: Protocol) -> Option<&ExposedPort> {
        self.ports
            .iter()
            .find(|p| p.port == port && p.protocol == protocol)
    }

    pub fn reference(&self, selector: Selector) -> WorkloadRef {
        WorkloadRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            selector,
        }
    }
}

// === impl WorkloadRef ===

impl WorkloadRef {
    /// The peer that denotes this workload from within its own namespace.
    pub fn as_peer(&self) -> Peer {
        Peer::Workloads(self.selector.clone())
    }
}
