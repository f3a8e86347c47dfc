use crate::{
    client::Cluster,
    core::{
        Direction, Evaluation, Evaluator, PolicyStore, PortQuery, Protocol, Selector,
        WorkloadDirectory,
    },
    PolicyCheck, WorkloadSummary,
};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "netpol-reach",
    version,
    about = "Explains whether network policies admit traffic between workloads"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "netpol_reach=info,warn",
        env = "NETPOL_REACH_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "NETPOL_REACH_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Namespace of the workloads and policies
    #[clap(long, short = 'n', default_value = "default", global = true)]
    namespace: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluates whether the source workload can reach the target workload
    ///
    /// The report is printed as JSON whatever the verdict.
    Reach {
        /// Label selector of the source workload (e.g. app=backend)
        #[clap(long)]
        source: Selector,

        /// Label selector of the target workload (e.g. app=db)
        #[clap(long)]
        target: Selector,

        #[clap(long)]
        port: u16,

        #[clap(long, default_value = "TCP")]
        protocol: Protocol,
    },

    /// Describes a workload and the policies that select it
    Workload { name: String },

    /// Checks whether a single policy permits a peer on a port
    Policy {
        name: String,

        #[clap(long)]
        direction: Direction,

        #[clap(long)]
        port: u16,

        #[clap(long, default_value = "TCP")]
        protocol: Protocol,

        /// Label selector of the peer workloads
        #[clap(long)]
        peer: Selector,

        /// Name the destination workload gives the port, for policies that refer to named ports
        #[clap(long)]
        port_name: Option<String>,
    },
}

// === impl Args ===

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            namespace,
            command,
        } = self;

        log_format.try_init(log_level)?;

        let cluster = Cluster::new(client.try_client().await?);

        match command {
            Command::Reach {
                source,
                target,
                port,
                protocol,
            } => {
                let evaluator = Evaluator::new(cluster.clone(), cluster);
                let evaluation = evaluator
                    .evaluate_reachability(&namespace, &source, &target, port, protocol)
                    .await?;
                match &evaluation {
                    Evaluation::Evaluated(report) => {
                        info!(allowed = report.allowed, "Evaluated reachability")
                    }
                    Evaluation::MissingWorkload { side, selector } => {
                        info!(?side, %selector, "No workload matches")
                    }
                }
                print(&evaluation)
            }

            Command::Workload { name } => {
                let Some(workload) =
                    WorkloadDirectory::get_by_name(&cluster, &namespace, &name).await?
                else {
                    bail!("pod {namespace}/{name} not found");
                };
                let policies = cluster.list_in_namespace(&namespace).await?;
                print(&WorkloadSummary::new(workload, &policies))
            }

            Command::Policy {
                name,
                direction,
                port,
                protocol,
                peer,
                port_name,
            } => {
                let Some(policy) = PolicyStore::get_by_name(&cluster, &namespace, &name).await?
                else {
                    bail!("network policy {namespace}/{name} not found");
                };
                let query = PortQuery {
                    port,
                    protocol,
                    name: port_name,
                };
                print(&PolicyCheck::new(&policy, direction, query, peer))
            }
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    std::io::Write::write_all(&mut stdout, b"\n")?;
    Ok(())
}
