use anyhow::{Context, Result};
use netpol_reach_core::{ExposedPort, Protocol, Workload};
use netpol_reach_k8s_api::{self as k8s, ResourceExt};
use std::net::IpAddr;
use tracing::warn;

/// Decodes a pod into a workload.
///
/// Container ports with an out-of-range number or an unsupported protocol are skipped, as are
/// addresses that do not parse.
pub fn workload(pod: k8s::Pod) -> Result<Workload> {
    let name = pod.name_unchecked();
    let namespace = pod
        .namespace()
        .with_context(|| format!("pod {name} has no namespace"))?;
    let addresses = pod.status.as_ref().map(addresses).unwrap_or_default();
    let ports = pod.spec.as_ref().map(exposed_ports).unwrap_or_default();
    Ok(Workload {
        name,
        namespace,
        labels: pod.metadata.labels.into(),
        addresses,
        ports,
    })
}

/// Returns the pod's primary IP followed by any additional IPs, without duplicates.
pub(crate) fn addresses(status: &k8s::PodStatus) -> Vec<IpAddr> {
    let others = status.pod_ips.iter().flatten().filter_map(|pod_ip| {
        let ip: Option<String> = pod_ip.ip.clone().into();
        ip
    });

    let mut addrs = Vec::new();
    for ip in status.pod_ip.iter().cloned().chain(others) {
        match ip.parse::<IpAddr>() {
            Ok(addr) => {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
            Err(error) => warn!(%error, %ip, "Ignoring invalid pod IP"),
        }
    }
    addrs
}

pub(crate) fn exposed_ports(spec: &k8s::PodSpec) -> Vec<ExposedPort> {
    let mut ports = Vec::new();
    for container in &spec.containers {
        for port in container.ports.iter().flatten() {
            let Ok(number) = u16::try_from(port.container_port) else {
                warn!(container = %container.name, port = port.container_port, "Ignoring invalid container port");
                continue;
            };
            let protocol = match Protocol::parse_or_default(port.protocol.as_deref()) {
                Ok(protocol) => protocol,
                Err(error) => {
                    warn!(%error, container = %container.name, port = number, "Ignoring container port");
                    continue;
                }
            };
            ports.push(ExposedPort {
                container: container.name.clone(),
                port: number,
                protocol,
                name: port.name.clone(),
            });
        }
    }
    ports
}
