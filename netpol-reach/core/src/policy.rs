//! A closed model of namespace-scoped network policies.

use crate::Protocol;
use netpol_reach_k8s_api::{Network, Selector};
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// A network policy, as governed by the default-deny/allow-list model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub namespace: String,

    /// Selects the workloads, in `namespace`, that this policy governs.
    pub selector: Selector,

    pub ingress: Vec<RuleClause>,
    pub egress: Vec<RuleClause>,

    /// The directions this policy governs. A governed direction with no matching clause is
    /// denied, even when the policy has no clauses for it at all.
    pub directions: BTreeSet<Direction>,
}

/// One ingress or egress entry of a policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleClause {
    /// Ports the clause applies to. Empty means every port.
    pub ports: Vec<PortMatch>,

    /// Peers the clause permits. Empty means no peer is permitted.
    pub peers: Vec<Peer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMatch {
    /// When unset, every port of `protocol` matches.
    pub port: Option<Port>,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Port {
    Number(u16),

    /// An inclusive port range.
    Range { start: u16, end: u16 },

    /// A named container port on the destination workload.
    Named(String),
}

/// Describes a set of remote endpoints.
///
/// Two peers are equivalent when they are structurally equal: selectors compare as label and
/// expression sets and networks compare by canonical CIDR and exception set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Peer {
    /// Workloads in the policy's own namespace.
    Workloads(Selector),

    /// All workloads in the selected namespaces.
    Namespaces(Selector),

    /// Workloads matching `workloads` in namespaces matching `namespaces`.
    WorkloadsInNamespaces {
        workloads: Selector,
        namespaces: Selector,
    },

    Network(Network),
}

// === impl Direction ===

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Ingress => Self::Egress,
            Self::Egress => Self::Ingress,
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.eq_ignore_ascii_case("ingress") {
            Ok(Self::Ingress)
        } else if s.eq_ignore_ascii_case("egress") {
            Ok(Self::Egress)
        } else {
            anyhow::bail!("invalid direction: {:?}", s)
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => "ingress".fmt(f),
            Self::Egress => "egress".fmt(f),
        }
    }
}

// === impl Policy ===

impl Policy {
    /// The directions a policy governs when it does not declare them: ingress always, egress
    /// only when the policy has egress clauses.
    pub fn default_directions(has_egress: bool) -> BTreeSet<Direction> {
        let mut dirs = BTreeSet::from([Direction::Ingress]);
        if has_egress {
            dirs.insert(Direction::Egress);
        }
        dirs
    }

    pub fn governs(&self, direction: Direction) -> bool {
        self.directions.contains(&direction)
    }

    pub fn clauses(&self, direction: Direction) -> &[RuleClause] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }
}

// === impl Peer ===

impl Peer {
    #[inline]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workloads(sel) => write!(f, "workloads({sel})"),
            Self::Namespaces(sel) => write!(f, "namespaces({sel})"),
            Self::WorkloadsInNamespaces {
                workloads,
                namespaces,
            } => write!(f, "workloads({workloads}) in namespaces({namespaces})"),
            Self::Network(net) => write!(f, "network({net})"),
        }
    }
}
