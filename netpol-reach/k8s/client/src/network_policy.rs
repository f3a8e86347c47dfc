use anyhow::{Context, Result};
use netpol_reach_core::{
    Direction, Network, Peer, Policy, Port, PortMatch, Protocol, RuleClause, Selector,
};
use netpol_reach_k8s_api::{self as k8s, Expression, Operator, ResourceExt};
use std::collections::BTreeSet;
use tracing::warn;

/// Decodes a network policy.
///
/// A rule without `from`/`to` peers permits nothing. When the policy does not list its policy
/// types, it governs ingress and, if it has egress rules, egress.
pub fn policy(np: k8s::NetworkPolicy) -> Result<Policy> {
    let name = np.name_unchecked();
    let namespace = np
        .namespace()
        .with_context(|| format!("network policy {name} has no namespace"))?;
    let spec = np
        .spec
        .with_context(|| format!("network policy {namespace}/{name} has no spec"))?;

    let pod_selector: Option<k8s::LabelSelector> = spec.pod_selector.into();
    let selector = selector(pod_selector)
        .with_context(|| format!("network policy {namespace}/{name} has an invalid podSelector"))?;

    let ingress = spec
        .ingress
        .into_iter()
        .flatten()
        .map(|rule| clause(rule.ports, rule.from))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("network policy {namespace}/{name} has an invalid ingress rule"))?;
    let egress = spec
        .egress
        .into_iter()
        .flatten()
        .map(|rule| clause(rule.ports, rule.to))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("network policy {namespace}/{name} has an invalid egress rule"))?;

    let directions = match spec.policy_types {
        Some(types) if !types.is_empty() => types
            .iter()
            .map(|t| t.parse::<Direction>())
            .collect::<Result<BTreeSet<_>>>()?,
        _ => Policy::default_directions(!egress.is_empty()),
    };

    Ok(Policy {
        name,
        namespace,
        selector,
        ingress,
        egress,
        directions,
    })
}

/// Decodes a label selector. An absent selector selects everything.
pub(crate) fn selector(selector: Option<k8s::LabelSelector>) -> Result<Selector> {
    let Some(selector) = selector else {
        return Ok(Selector::default());
    };
    let exprs = selector
        .match_expressions
        .into_iter()
        .flatten()
        .map(|req| -> Result<Expression> {
            let operator = req.operator.parse::<Operator>()?;
            let expr = Expression::new(req.key, operator, req.values.into_iter().flatten())?;
            Ok(expr)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Selector::new(
        selector.match_labels.unwrap_or_default(),
        exprs,
    ))
}

fn clause(
    ports: Option<Vec<k8s::NetworkPolicyPort>>,
    peers: Option<Vec<k8s::NetworkPolicyPeer>>,
) -> Result<RuleClause> {
    let ports = ports
        .into_iter()
        .flatten()
        .map(port_match)
        .collect::<Result<Vec<_>>>()?;
    let peers = peers
        .into_iter()
        .flatten()
        .filter_map(|p| peer(p).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(RuleClause { ports, peers })
}

fn port_match(np: k8s::NetworkPolicyPort) -> Result<PortMatch> {
    let protocol = Protocol::parse_or_default(np.protocol.as_deref())?;
    let port = match (np.port, np.end_port) {
        (None, _) => None,
        (Some(k8s::IntOrString::Int(start)), Some(end)) => Some(Port::Range {
            start: port_number(start)?,
            end: port_number(end)?,
        }),
        (Some(k8s::IntOrString::Int(port)), None) => Some(Port::Number(port_number(port)?)),
        (Some(k8s::IntOrString::String(name)), _) => Some(Port::Named(name)),
    };
    Ok(PortMatch { port, protocol })
}

fn port_number(port: i32) -> Result<u16> {
    u16::try_from(port).with_context(|| format!("invalid port number: {port}"))
}

/// Decodes a peer. Returns `None` for peers that cannot be represented: IP blocks that do not
/// parse and entries that set no field at all.
fn peer(peer: k8s::NetworkPolicyPeer) -> Result<Option<Peer>> {
    if let Some(block) = peer.ip_block {
        return match Network::parse(&block.cidr, block.except.iter().flatten()) {
            Ok(net) => Ok(Some(Peer::Network(net))),
            Err(error) => {
                warn!(%error, cidr = %block.cidr, "Ignoring peer with an invalid IP block");
                Ok(None)
            }
        };
    }

    let peer = match (peer.pod_selector, peer.namespace_selector) {
        (Some(workloads), None) => Peer::Workloads(selector(Some(workloads))?),
        (None, Some(namespaces)) => Peer::Namespaces(selector(Some(namespaces))?),
        (Some(workloads), Some(namespaces)) => Peer::WorkloadsInNamespaces {
            workloads: selector(Some(workloads))?,
            namespaces: selector(Some(namespaces))?,
        },
        (None, None) => {
            warn!("Ignoring peer without selectors or IP block");
            return Ok(None);
        }
    };
    Ok(Some(peer))
}
