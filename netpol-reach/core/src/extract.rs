use crate::{
    correlate::RuleKey, Direction, Peer, Policy, Port, PortMatch, Protocol, RuleClause, Workload,
    WorkloadRef,
};
use netpol_reach_k8s_api::Selector;
use serde::Serialize;
use tracing::trace;

/// The port being evaluated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PortQuery {
    pub port: u16,
    pub protocol: Protocol,

    /// The name the destination workload gives this port, if any. Used to match clauses that
    /// refer to named ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The peers one policy permits for a workload on the queried port, in one direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtractedRule {
    pub policy: String,
    pub workload: WorkloadRef,
    pub direction: Direction,
    pub query: PortQuery,
    pub peers: Vec<Peer>,

    /// Handles to the rules of the opposite direction that this rule correlates with. Only the
    /// correlator populates this list.
    pub correlated: Vec<RuleKey>,
}

/// Extracts, for each policy, the peers that its `direction` clauses permit on `query`.
///
/// Clauses with no peers permit nothing and are skipped, whatever their ports. The peers of every
/// matching clause of a policy are merged into a single rule; policies that end up with no peers
/// (or that do not govern `direction`) produce no rule.
pub fn extract(
    workload: &Workload,
    selector: &Selector,
    policies: &[&Policy],
    query: &PortQuery,
    direction: Direction,
) -> Vec<ExtractedRule> {
    let mut rules = Vec::new();
    for policy in policies {
        if !policy.governs(direction) {
            trace!(policy = %policy.name, %direction, "Policy does not govern direction");
            continue;
        }

        let peers = permitted_peers(policy, query, direction);
        if peers.is_empty() {
            trace!(policy = %policy.name, %direction, "No clause permits the port");
            continue;
        }

        rules.push(ExtractedRule {
            policy: policy.name.clone(),
            workload: workload.reference(selector.clone()),
            direction,
            query: query.clone(),
            peers,
            correlated: Vec::new(),
        });
    }
    rules
}

/// Returns true if `policy` has a `direction` clause that permits `peer` on `query`.
pub fn policy_allows(policy: &Policy, direction: Direction, query: &PortQuery, peer: &Peer) -> bool {
    policy.governs(direction)
        && permitted_peers(policy, query, direction)
            .iter()
            .any(|p| p.is_equivalent(peer))
}

fn permitted_peers(policy: &Policy, query: &PortQuery, direction: Direction) -> Vec<Peer> {
    let mut peers = Vec::<Peer>::new();
    for clause in policy.clauses(direction) {
        if clause.peers.is_empty() || !clause.matches(query) {
            continue;
        }
        for peer in &clause.peers {
            if !peers.contains(peer) {
                peers.push(peer.clone());
            }
        }
    }
    peers
}

// === impl ExtractedRule ===

impl ExtractedRule {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            policy: self.policy.clone(),
            namespace: self.workload.namespace.clone(),
            workload: self.workload.name.clone(),
        }
    }

    /// Returns true if one of this rule's peers denotes `other`.
    pub fn admits(&self, other: &WorkloadRef) -> bool {
        if self.workload.namespace != other.namespace {
            return false;
        }
        let peer = other.as_peer();
        self.peers.iter().any(|p| p.is_equivalent(&peer))
    }

    pub(crate) fn link(&mut self, key: RuleKey) {
        if !self.correlated.contains(&key) {
            self.correlated.push(key);
        }
    }
}

// === impl RuleClause ===

impl RuleClause {
    /// Returns true if the clause applies to `query`. A clause without ports applies to every
    /// port and protocol.
    pub fn matches(&self, query: &PortQuery) -> bool {
        self.ports.is_empty() || self.ports.iter().any(|p| p.matches(query))
    }
}

// === impl PortMatch ===

impl PortMatch {
    pub fn matches(&self, query: &PortQuery) -> bool {
        if self.protocol != query.protocol {
            return false;
        }
        match &self.port {
            None => true,
            Some(Port::Number(port)) => *port == query.port,
            Some(Port::Range { start, end }) => (*start..=*end).contains(&query.port),
            Some(Port::Named(name)) => query.name.as_deref() == Some(name.as_str()),
        }
    }
}
