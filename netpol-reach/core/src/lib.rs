//! Network policy reachability evaluation.
//!
//! Given a source and a target workload in a namespace, together with a port and protocol, the
//! evaluator decides whether the namespace's network policies admit traffic between them and
//! explains why:
//!
//! - The policy index selects the policies that govern each workload.
//! - The rule extractor collects, per policy, the peers that the policy's clauses permit on the
//!   queried port: egress clauses for the source, ingress clauses for the target.
//! - The correlator links each egress rule to the ingress rules whose peers name the other side,
//!   so an allow-path is visible from both ends.
//!
//! ```text
//! [ Workload ] <- [ Policy ] -> [ RuleClause ] -> [ ExtractedRule ] <-> [ ExtractedRule ]
//! ```
//!
//! All evaluation happens over an in-memory snapshot. Fetching workloads and policies is left to
//! the `WorkloadDirectory` and `PolicyStore` collaborators.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod correlate;
mod discover;
mod extract;
mod index;
pub mod policy;
pub mod probe;
mod protocol;
mod reachability;
mod workload;

#[cfg(test)]
mod tests;

pub use self::{
    correlate::{Evidence, RuleKey},
    discover::{PolicyStore, WorkloadDirectory},
    extract::{extract, policy_allows, ExtractedRule, PortQuery},
    index::{governing, matching_policies},
    policy::{Direction, Peer, Policy, Port, PortMatch, RuleClause},
    probe::{ProbeError, ProbeOutcome, ProbeRequest, Prober, Verification},
    protocol::{InvalidProtocol, Protocol},
    reachability::{
        evaluate, Admission, Evaluation, Evaluator, ReachabilityReport, Selected, Side,
    },
    workload::{ExposedPort, Workload, WorkloadRef},
};
pub use netpol_reach_k8s_api::{IpNet, Labels, Network, Selector};
