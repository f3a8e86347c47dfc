use crate::{
    extract, governing, matching_policies, Direction, Evidence, ExposedPort, Policy, PolicyStore,
    PortQuery, Protocol, Workload, WorkloadDirectory, WorkloadRef,
};
use anyhow::Result;
use netpol_reach_k8s_api::Selector;
use serde::Serialize;
use std::net::IpAddr;
use tracing::{debug, instrument};

/// How the policies that select a workload treat one direction of traffic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// No policy governs the direction, so all traffic is admitted.
    Unrestricted,

    /// At least one policy governs the direction and an allow-path exists.
    Allowed,

    /// At least one policy governs the direction and no allow-path exists.
    Denied,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

/// A workload along with the selector that was used to find it.
#[derive(Copy, Clone, Debug)]
pub struct Selected<'a> {
    pub workload: &'a Workload,
    pub selector: &'a Selector,
}

/// Explains whether traffic from a source workload can reach a target workload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityReport {
    pub source: WorkloadRef,
    pub target: WorkloadRef,
    pub query: PortQuery,
    pub target_addresses: Vec<IpAddr>,

    /// The target container port that serves the query, if any.
    pub exposure: Option<ExposedPort>,

    /// Names of the policies that govern the source's egress.
    pub egress_policies: Vec<String>,

    /// Names of the policies that govern the target's ingress.
    pub ingress_policies: Vec<String>,

    pub egress: Admission,
    pub ingress: Admission,
    pub evidence: Evidence,
    pub allowed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Evaluation {
    Evaluated(ReachabilityReport),
    MissingWorkload { side: Side, selector: Selector },
}

/// Evaluates a snapshot through the workload directory and policy store.
#[derive(Clone, Debug)]
pub struct Evaluator<W, P> {
    workloads: W,
    policies: P,
}

/// Evaluates whether `policies` admit traffic from `source` to `target` on `port`/`protocol`.
///
/// Traffic is allowed when the target exposes the port and neither the source's egress nor the
/// target's ingress is denied. A governed direction is allowed when one of its rules correlates
/// with a rule on the other side, or, if the other side is unrestricted, when one of its rules
/// names the other workload by itself.
pub fn evaluate(
    source: Selected<'_>,
    target: Selected<'_>,
    policies: &[Policy],
    port: u16,
    protocol: Protocol,
) -> ReachabilityReport {
    let exposure = target.workload.exposed_port(port, protocol).cloned();
    let query = PortQuery {
        port,
        protocol,
        name: exposure.as_ref().and_then(|p| p.name.clone()),
    };

    let source_policies = matching_policies(source.workload, policies);
    let target_policies = matching_policies(target.workload, policies);
    let egress_policies = governing(&source_policies, Direction::Egress);
    let ingress_policies = governing(&target_policies, Direction::Ingress);

    let mut evidence = Evidence::new(
        extract(
            source.workload,
            source.selector,
            &source_policies,
            &query,
            Direction::Egress,
        ),
        extract(
            target.workload,
            target.selector,
            &target_policies,
            &query,
            Direction::Ingress,
        ),
    );
    evidence.correlate();

    let source_ref = source.workload.reference(source.selector.clone());
    let target_ref = target.workload.reference(target.selector.clone());
    let egress = admission(
        &evidence,
        Direction::Egress,
        !egress_policies.is_empty(),
        !ingress_policies.is_empty(),
        &target_ref,
        &query,
    );
    let ingress = admission(
        &evidence,
        Direction::Ingress,
        !ingress_policies.is_empty(),
        !egress_policies.is_empty(),
        &source_ref,
        &query,
    );
    let allowed = exposure.is_some() && egress != Admission::Denied && ingress != Admission::Denied;
    debug!(
        source = %source_ref.name,
        target = %target_ref.name,
        exposed = exposure.is_some(),
        ?egress,
        ?ingress,
        allowed,
        "Evaluated",
    );

    ReachabilityReport {
        source: source_ref,
        target: target_ref,
        query,
        target_addresses: target.workload.addresses.clone(),
        exposure,
        egress_policies,
        ingress_policies,
        egress,
        ingress,
        evidence,
        allowed,
    }
}

fn admission(
    evidence: &Evidence,
    direction: Direction,
    governed: bool,
    opposite_governed: bool,
    opposite: &WorkloadRef,
    query: &PortQuery,
) -> Admission {
    if !governed {
        return Admission::Unrestricted;
    }

    let allowed = if opposite_governed {
        !evidence
            .filter_correlated(direction, query.port, query.protocol)
            .is_empty()
    } else {
        evidence
            .rules(direction)
            .iter()
            .any(|rule| rule.admits(opposite))
    };

    if allowed {
        Admission::Allowed
    } else {
        Admission::Denied
    }
}

// === impl Evaluator ===

impl<W, P> Evaluator<W, P> {
    pub fn new(workloads: W, policies: P) -> Self {
        Self {
            workloads,
            policies,
        }
    }

    pub fn workloads(&self) -> &W {
        &self.workloads
    }

    pub fn policies(&self) -> &P {
        &self.policies
    }
}

impl<W: WorkloadDirectory, P: PolicyStore> Evaluator<W, P> {
    /// Fetches the source, the target and the namespace's policies concurrently and evaluates
    /// them. When several workloads match a selector, the first one is evaluated.
    #[instrument(skip(self, source, target), fields(source = %source, target = %target))]
    pub async fn evaluate_reachability(
        &self,
        namespace: &str,
        source: &Selector,
        target: &Selector,
        port: u16,
        protocol: Protocol,
    ) -> Result<Evaluation> {
        let (sources, targets, policies) = futures::try_join!(
            self.workloads.list_by_selector(namespace, source),
            self.workloads.list_by_selector(namespace, target),
            self.policies.list_in_namespace(namespace),
        )?;

        let Some(src) = first(&sources, Side::Source) else {
            return Ok(Evaluation::MissingWorkload {
                side: Side::Source,
                selector: source.clone(),
            });
        };
        let Some(dst) = first(&targets, Side::Target) else {
            return Ok(Evaluation::MissingWorkload {
                side: Side::Target,
                selector: target.clone(),
            });
        };

        Ok(Evaluation::Evaluated(evaluate(
            Selected {
                workload: src,
                selector: source,
            },
            Selected {
                workload: dst,
                selector: target,
            },
            &policies,
            port,
            protocol,
        )))
    }
}

fn first(workloads: &[Workload], side: Side) -> Option<&Workload> {
    match workloads {
        [] => {
            debug!(?side, "No workload matches");
            None
        }
        [w] => Some(w),
        [w, ..] => {
            debug!(?side, matches = workloads.len(), workload = %w.name, "Evaluating the first match");
            Some(w)
        }
    }
}
