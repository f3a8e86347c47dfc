//! Live connectivity probes.
//!
//! A probe is only ever used to check a verdict after the fact; it never feeds into the
//! evaluation itself.

use crate::{Protocol, ReachabilityReport};
use serde::Serialize;
use std::{net::IpAddr, time::Duration};
use tracing::{debug, info};

/// Connects from a source workload to a target address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeRequest {
    pub namespace: String,

    /// The name of the workload that the probe runs from.
    pub source: String,

    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,

    /// How long the connection attempt itself may take.
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub output: String,
    pub succeeded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The probe did not finish within its deadline. This usually means the probe never started
    /// (e.g. its container could not be scheduled) and says nothing about policy.
    #[error("probe did not complete within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Runs connectivity probes.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn run(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ProbeError>;
}

/// Compares a probe outcome with a verdict.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verification {
    Confirmed,
    Contradicted { expected: bool, observed: bool },
}

// === impl ProbeRequest ===

impl ProbeRequest {
    /// Extra time, on top of the connection timeout, that a probe may spend starting up.
    pub const STARTUP_GRACE: Duration = Duration::from_secs(30);

    /// Builds a probe against the target's primary address. Returns `None` if the target has no
    /// address yet.
    pub fn for_report(report: &ReachabilityReport, timeout: Duration) -> Option<Self> {
        let address = *report.target_addresses.first()?;
        Some(Self {
            namespace: report.source.namespace.clone(),
            source: report.source.name.clone(),
            address,
            port: report.query.port,
            protocol: report.query.protocol,
            timeout,
        })
    }

    /// The total time a prober may take before it must fail with `ProbeError::Timeout`.
    pub fn deadline(&self) -> Duration {
        self.timeout + Self::STARTUP_GRACE
    }

    /// The netcat invocation that performs the probe.
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            "nc".to_string(),
            "-vz".to_string(),
            "-w".to_string(),
            self.timeout.as_secs().max(1).to_string(),
        ];
        match self.protocol {
            Protocol::Tcp => {}
            Protocol::Udp => cmd.push("-u".to_string()),
            Protocol::Sctp => cmd.push("--sctp".to_string()),
        }
        cmd.push(self.address.to_string());
        cmd.push(self.port.to_string());
        cmd
    }
}

// === impl Verification ===

impl Verification {
    pub fn of(report: &ReachabilityReport, outcome: &ProbeOutcome) -> Self {
        if report.allowed == outcome.succeeded {
            Self::Confirmed
        } else {
            Self::Contradicted {
                expected: report.allowed,
                observed: outcome.succeeded,
            }
        }
    }
}

/// Probes the target of `report` and compares the result with the report's verdict.
///
/// Returns `Ok(None)` when the target has no address to probe.
pub async fn verify<P: Prober + ?Sized>(
    prober: &P,
    report: &ReachabilityReport,
    timeout: Duration,
) -> Result<Option<(ProbeOutcome, Verification)>, ProbeError> {
    let Some(request) = ProbeRequest::for_report(report, timeout) else {
        debug!(target = %report.target.name, "Target has no address to probe");
        return Ok(None);
    };

    let outcome = prober.run(&request).await?;
    let verification = Verification::of(report, &outcome);
    info!(
        source = %request.source,
        address = %request.address,
        port = request.port,
        succeeded = outcome.succeeded,
        ?verification,
        "Probed",
    );
    Ok(Some((outcome, verification)))
}
