use crate::{
    probe, Admission, Direction, Evaluation, Evaluator, Evidence, ExposedPort, Labels, Peer,
    Policy, PolicyStore, Port, PortMatch, PortQuery, ProbeError, ProbeOutcome, ProbeRequest,
    Prober, Protocol, ReachabilityReport, RuleClause, Selected, Selector, Side, Verification,
    Workload, WorkloadDirectory,
};
use anyhow::{anyhow, Result};
use std::{iter::FromIterator, net::IpAddr, time::Duration};

const NS: &str = "test-app";

/// Scenario A: backend may send to db on 3306/TCP and db accepts it from backend.
#[test]
fn correlated_allow_path() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
    ];

    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    assert!(report.allowed);
    assert_eq!(report.egress, Admission::Allowed);
    assert_eq!(report.ingress, Admission::Allowed);
    assert_eq!(
        report.exposure,
        Some(ExposedPort {
            container: "mysql".to_string(),
            port: 3306,
            protocol: Protocol::Tcp,
            name: Some("mysql".to_string()),
        })
    );

    let Evidence { egress, ingress } = &report.evidence;
    assert_eq!(egress.len(), 1);
    assert_eq!(ingress.len(), 1);
    assert_eq!(egress[0].policy, "allow-egress");
    assert_eq!(egress[0].correlated, vec![ingress[0].key()]);
    assert_eq!(ingress[0].correlated, vec![egress[0].key()]);

    let paths = report
        .evidence
        .filter_correlated(Direction::Egress, 3306, Protocol::Tcp);
    assert_eq!(paths, vec![&egress[0]]);
    let opposite = report.evidence.correlated(&egress[0]).collect::<Vec<_>>();
    assert_eq!(opposite, vec![&ingress[0]]);
}

/// Scenario B: db only accepts traffic from frontend.
#[test]
fn mismatched_ingress_peer_denies() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("frontend")),
    ];

    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.ingress, Admission::Denied);
    assert_eq!(report.ingress_policies, vec!["allow-ingress"]);

    let egress = &report.evidence.egress;
    assert_eq!(egress.len(), 1);
    assert!(egress[0].correlated.is_empty());
    assert!(report
        .evidence
        .filter_correlated(Direction::Ingress, 3306, Protocol::Tcp)
        .is_empty());
    assert!(report
        .evidence
        .filter_correlated(Direction::Egress, 3306, Protocol::Tcp)
        .is_empty());
}

/// Scenario C: without any policy the namespace is open.
#[test]
fn no_policies_is_unrestricted() {
    let (backend, db) = (mk_backend(), mk_db());
    let report = evaluate(&backend, &db, &[], 3306, Protocol::Tcp);
    assert!(report.allowed);
    assert_eq!(report.egress, Admission::Unrestricted);
    assert_eq!(report.ingress, Admission::Unrestricted);
    assert!(report.evidence.egress.is_empty());
    assert!(report.evidence.ingress.is_empty());
    assert!(report.egress_policies.is_empty());
    assert!(report.ingress_policies.is_empty());
}

/// Scenario D: a clause without ports admits its peers on any port and protocol.
#[test]
fn wildcard_ports_match_any_query() {
    let db = mk_db();
    let policy = mk_policy(
        "allow-backend",
        "db",
        vec![RuleClause {
            ports: vec![],
            peers: vec![app("backend")],
        }],
        vec![],
        [Direction::Ingress],
    );
    let matched = crate::matching_policies(&db, [&policy]);
    let selector = app_selector("db");

    let mut peer_sets = Vec::new();
    for (port, protocol) in [(22, Protocol::Udp), (3306, Protocol::Tcp)] {
        let query = PortQuery {
            port,
            protocol,
            name: None,
        };
        let rules = crate::extract(&db, &selector, &matched, &query, Direction::Ingress);
        assert_eq!(rules.len(), 1, "{port}/{protocol}");
        peer_sets.push(rules[0].peers.clone());
    }
    assert_eq!(peer_sets[0], vec![app("backend")]);
    assert_eq!(peer_sets[0], peer_sets[1]);
}

#[test]
fn selected_without_ingress_clauses_is_denied() {
    let (backend, db) = (mk_backend(), mk_db());
    let deny_all = mk_policy("deny-all", "db", vec![], vec![], [Direction::Ingress]);

    let report = evaluate(&backend, &db, &[deny_all], 3306, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.egress, Admission::Unrestricted);
    assert_eq!(report.ingress, Admission::Denied);
    assert!(report.evidence.ingress.is_empty());
}

#[test]
fn empty_peer_list_never_allows() {
    let (backend, db) = (mk_backend(), mk_db());
    let policy = mk_policy(
        "no-peers",
        "db",
        vec![RuleClause {
            ports: vec![tcp(3306)],
            peers: vec![],
        }],
        vec![],
        [Direction::Ingress],
    );

    let report = evaluate(&backend, &db, &[policy], 3306, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.ingress, Admission::Denied);
    assert!(report.evidence.ingress.is_empty());
}

#[test]
fn one_sided_rule_suffices_when_other_side_is_open() {
    let (backend, db) = (mk_backend(), mk_db());

    let egress_only = vec![mk_egress_policy(
        "allow-egress",
        "backend",
        tcp(3306),
        app("db"),
    )];
    let report = evaluate(&backend, &db, &egress_only, 3306, Protocol::Tcp);
    assert!(report.allowed);
    assert_eq!(report.egress, Admission::Allowed);
    assert_eq!(report.ingress, Admission::Unrestricted);
    assert!(report.evidence.egress[0].correlated.is_empty());

    let wrong_peer = vec![mk_egress_policy(
        "allow-egress",
        "backend",
        tcp(3306),
        app("cache"),
    )];
    let report = evaluate(&backend, &db, &wrong_peer, 3306, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.egress, Admission::Denied);
}

#[test]
fn unexposed_port_is_never_allowed() {
    let (backend, db) = (mk_backend(), mk_db());
    let report = evaluate(&backend, &db, &[], 5432, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.exposure, None);
    assert_eq!(report.ingress, Admission::Unrestricted);

    let report = evaluate(&backend, &db, &[], 3306, Protocol::Udp);
    assert!(!report.allowed, "exposure is protocol-specific");
}

#[test]
fn named_port_clauses_follow_target_port_names() {
    let (backend, db) = (mk_backend(), mk_db());
    let named = PortMatch {
        port: Some(Port::Named("mysql".to_string())),
        protocol: Protocol::Tcp,
    };
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", named.clone(), app("db")),
        mk_ingress_policy("allow-ingress", "db", named, app("backend")),
    ];

    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    assert!(report.allowed);
    assert_eq!(report.query.name.as_deref(), Some("mysql"));
}

#[test]
fn policy_types_limit_governed_directions() {
    let (backend, db) = (mk_backend(), mk_db());
    // Selects backend but only governs ingress, so its egress clauses are inert.
    let policy = mk_policy(
        "ingress-only",
        "backend",
        vec![],
        vec![RuleClause {
            ports: vec![tcp(3306)],
            peers: vec![app("cache")],
        }],
        [Direction::Ingress],
    );

    let report = evaluate(&backend, &db, &[policy], 3306, Protocol::Tcp);
    assert!(report.allowed);
    assert_eq!(report.egress, Admission::Unrestricted);
    assert!(report.evidence.egress.is_empty());
}

#[test]
fn correlate_is_idempotent_and_symmetric() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_policy(
            "allow-egress-wide",
            "backend",
            vec![],
            vec![RuleClause {
                ports: vec![],
                peers: vec![app("db"), app("cache")],
            }],
            [Direction::Egress],
        ),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
        mk_ingress_policy("allow-ingress-other", "db", tcp(3306), app("frontend")),
    ];

    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    let once = report.evidence.clone();

    let mut twice = once.clone();
    twice.correlate();
    twice.correlate();
    assert_eq!(once, twice, "correlate must not duplicate links");

    // Rebuilding the arena from copies of the rules must not duplicate links either.
    let mut rebuilt = Evidence::new(once.egress.clone(), once.ingress.clone());
    rebuilt.correlate();
    assert_eq!(once, rebuilt);

    for (rules, opposite) in [
        (&once.egress, &once.ingress),
        (&once.ingress, &once.egress),
    ] {
        for rule in rules.iter() {
            for key in &rule.correlated {
                let other = opposite
                    .iter()
                    .find(|r| r.key() == *key)
                    .expect("correlated rule must exist");
                assert!(other.correlated.contains(&rule.key()));
            }
        }
    }

    assert_eq!(once.egress.len(), 2);
    assert_eq!(once.ingress.len(), 2);
    assert_eq!(once.egress[0].correlated.len(), 1);
    assert_eq!(once.egress[1].correlated.len(), 1);
    assert_eq!(once.ingress[0].correlated.len(), 2);
    assert!(once.ingress[1].correlated.is_empty());
}

#[test]
fn filtered_rules_are_a_subset() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_egress_policy("allow-cache", "backend", tcp(3306), app("cache")),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
    ];
    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);

    let filtered = report
        .evidence
        .filter_correlated(Direction::Egress, 3306, Protocol::Tcp);
    assert_eq!(filtered.len(), 1);
    for rule in filtered {
        assert!(report.evidence.egress.contains(rule));
    }
    assert!(report
        .evidence
        .filter_correlated(Direction::Egress, 3307, Protocol::Tcp)
        .is_empty());
}

#[test]
fn evaluation_is_deterministic() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
        mk_ingress_policy("allow-other", "db", tcp(3306), app("frontend")),
    ];
    assert_eq!(
        evaluate(&backend, &db, &policies, 3306, Protocol::Tcp),
        evaluate(&backend, &db, &policies, 3306, Protocol::Tcp),
    );
}

#[test]
fn network_and_namespace_peers_do_not_correlate_with_workloads() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy(
            "allow-egress",
            "backend",
            tcp(3306),
            Peer::Network("10.0.0.0/24".parse().unwrap()),
        ),
        mk_ingress_policy(
            "allow-ingress",
            "db",
            tcp(3306),
            Peer::WorkloadsInNamespaces {
                workloads: app_selector("backend"),
                namespaces: Selector::from_iter(Some(("kubernetes.io/metadata.name", NS))),
            },
        ),
    ];

    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    assert!(!report.allowed);
    assert_eq!(report.evidence.egress.len(), 1);
    assert_eq!(report.evidence.ingress.len(), 1);
    assert!(report.evidence.egress[0].correlated.is_empty());
}

#[test]
fn report_serializes() {
    let (backend, db) = (mk_backend(), mk_db());
    let policies = vec![
        mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
        mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
    ];
    let report = evaluate(&backend, &db, &policies, 3306, Protocol::Tcp);
    let json = serde_json::to_value(Evaluation::Evaluated(report)).unwrap();
    assert_eq!(json["status"], "evaluated");
    assert_eq!(json["allowed"], true);
    assert_eq!(json["egress"], "allowed");
    assert_eq!(json["query"]["protocol"], "TCP");
    assert_eq!(
        json["evidence"]["egress"][0]["peers"][0]["workloads"]["matchLabels"]["app"],
        "db"
    );
}

// === Evaluator ===

#[tokio::test]
async fn evaluator_fetches_snapshot() {
    let snapshot = Snapshot {
        workloads: vec![mk_backend(), mk_db()],
        policies: vec![
            mk_egress_policy("allow-egress", "backend", tcp(3306), app("db")),
            mk_ingress_policy("allow-ingress", "db", tcp(3306), app("backend")),
        ],
    };
    let evaluator = Evaluator::new(snapshot.clone(), snapshot);

    let evaluation = evaluator
        .evaluate_reachability(
            NS,
            &app_selector("backend"),
            &app_selector("db"),
            3306,
            Protocol::Tcp,
        )
        .await
        .unwrap();
    let report = match evaluation {
        Evaluation::Evaluated(report) => report,
        evaluation => panic!("expected a report, got {evaluation:?}"),
    };
    assert!(report.allowed);
    assert_eq!(report.target_addresses, vec![ip("10.0.0.2"), ip("fd00::2")]);
}

#[tokio::test]
async fn evaluator_reports_missing_workloads() {
    let snapshot = Snapshot {
        workloads: vec![mk_backend()],
        policies: vec![],
    };
    let evaluator = Evaluator::new(snapshot.clone(), snapshot);

    let evaluation = evaluator
        .evaluate_reachability(
            NS,
            &app_selector("backend"),
            &app_selector("db"),
            3306,
            Protocol::Tcp,
        )
        .await
        .unwrap();
    assert_eq!(
        evaluation,
        Evaluation::MissingWorkload {
            side: Side::Target,
            selector: app_selector("db"),
        }
    );

    let evaluation = evaluator
        .evaluate_reachability(
            "other-ns",
            &app_selector("backend"),
            &app_selector("db"),
            3306,
            Protocol::Tcp,
        )
        .await
        .unwrap();
    assert!(matches!(
        evaluation,
        Evaluation::MissingWorkload {
            side: Side::Source,
            ..
        }
    ));
}

#[tokio::test]
async fn evaluator_propagates_backend_errors() {
    let snapshot = Snapshot {
        workloads: vec![mk_backend(), mk_db()],
        policies: vec![],
    };
    let evaluator = Evaluator::new(snapshot, Unavailable);
    let error = evaluator
        .evaluate_reachability(
            NS,
            &app_selector("backend"),
            &app_selector("db"),
            3306,
            Protocol::Tcp,
        )
        .await
        .expect_err("backend failure must surface");
    assert_eq!(error.to_string(), "connection refused");
}

// === Probes ===

#[test]
fn probe_command() {
    let mut req = ProbeRequest {
        namespace: NS.to_string(),
        source: "backend-0".to_string(),
        address: ip("10.0.0.2"),
        port: 3306,
        protocol: Protocol::Tcp,
        timeout: Duration::from_secs(5),
    };
    assert_eq!(req.command(), ["nc", "-vz", "-w", "5", "10.0.0.2", "3306"]);
    assert_eq!(req.deadline(), Duration::from_secs(35));

    req.protocol = Protocol::Udp;
    req.timeout = Duration::from_millis(10);
    assert_eq!(
        req.command(),
        ["nc", "-vz", "-w", "1", "-u", "10.0.0.2", "3306"]
    );
}

#[tokio::test]
async fn probe_verifies_verdict() {
    let (backend, db) = (mk_backend(), mk_db());
    let report = evaluate(&backend, &db, &[], 3306, Protocol::Tcp);
    assert!(report.allowed);

    let (outcome, verification) = probe::verify(
        &FixedProber(Ok(true)),
        &report,
        Duration::from_secs(5),
    )
    .await
    .unwrap()
    .expect("target has an address");
    assert!(outcome.succeeded);
    assert_eq!(verification, Verification::Confirmed);

    let (_, verification) = probe::verify(
        &FixedProber(Ok(false)),
        &report,
        Duration::from_secs(5),
    )
    .await
    .unwrap()
    .expect("target has an address");
    assert_eq!(
        verification,
        Verification::Contradicted {
            expected: true,
            observed: false,
        }
    );
}

#[tokio::test]
async fn probe_timeout_is_distinct() {
    let (backend, db) = (mk_backend(), mk_db());
    let report = evaluate(&backend, &db, &[], 3306, Protocol::Tcp);
    let error = probe::verify(&FixedProber(Err(())), &report, Duration::from_secs(5))
        .await
        .expect_err("probe must time out");
    assert!(matches!(error, ProbeError::Timeout(d) if d == Duration::from_secs(35)));

    let mut unscheduled = mk_db();
    unscheduled.addresses.clear();
    let report = evaluate(&backend, &unscheduled, &[], 3306, Protocol::Tcp);
    assert!(
        probe::verify(&FixedProber(Ok(true)), &report, Duration::from_secs(5))
            .await
            .unwrap()
            .is_none()
    );
}

// === Helpers ===

fn evaluate(
    source: &Workload,
    target: &Workload,
    policies: &[Policy],
    port: u16,
    protocol: Protocol,
) -> ReachabilityReport {
    let source_selector = selector_for(source);
    let target_selector = selector_for(target);
    crate::evaluate(
        Selected {
            workload: source,
            selector: &source_selector,
        },
        Selected {
            workload: target,
            selector: &target_selector,
        },
        policies,
        port,
        protocol,
    )
}

fn selector_for(workload: &Workload) -> Selector {
    let app = workload
        .labels
        .as_ref()
        .get("app")
        .cloned()
        .unwrap_or_default();
    Selector::from_iter(Some(("app".to_string(), app)))
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn app_selector(name: &'static str) -> Selector {
    Selector::from_iter(Some(("app", name)))
}

fn app(name: &'static str) -> Peer {
    Peer::Workloads(app_selector(name))
}

fn tcp(port: u16) -> PortMatch {
    PortMatch {
        port: Some(Port::Number(port)),
        protocol: Protocol::Tcp,
    }
}

fn mk_backend() -> Workload {
    Workload {
        name: "backend-0".to_string(),
        namespace: NS.to_string(),
        labels: Labels::from_iter(vec![("app", "backend"), ("pod-template-hash", "abc")]),
        addresses: vec![ip("10.0.0.1")],
        ports: vec![ExposedPort {
            container: "backend".to_string(),
            port: 8080,
            protocol: Protocol::Tcp,
            name: Some("http".to_string()),
        }],
    }
}

fn mk_db() -> Workload {
    Workload {
        name: "db-0".to_string(),
        namespace: NS.to_string(),
        labels: Labels::from_iter(Some(("app", "db"))),
        addresses: vec![ip("10.0.0.2"), ip("fd00::2")],
        ports: vec![ExposedPort {
            container: "mysql".to_string(),
            port: 3306,
            protocol: Protocol::Tcp,
            name: Some("mysql".to_string()),
        }],
    }
}

fn mk_policy(
    name: &str,
    selects_app: &'static str,
    ingress: Vec<RuleClause>,
    egress: Vec<RuleClause>,
    directions: impl IntoIterator<Item = Direction>,
) -> Policy {
    Policy {
        name: name.to_string(),
        namespace: NS.to_string(),
        selector: app_selector(selects_app),
        ingress,
        egress,
        directions: directions.into_iter().collect(),
    }
}

fn mk_egress_policy(name: &str, selects_app: &'static str, port: PortMatch, to: Peer) -> Policy {
    mk_policy(
        name,
        selects_app,
        vec![],
        vec![RuleClause {
            ports: vec![port],
            peers: vec![to],
        }],
        [Direction::Egress],
    )
}

fn mk_ingress_policy(
    name: &str,
    selects_app: &'static str,
    port: PortMatch,
    from: Peer,
) -> Policy {
    mk_policy(
        name,
        selects_app,
        vec![RuleClause {
            ports: vec![port],
            peers: vec![from],
        }],
        vec![],
        [Direction::Ingress],
    )
}

#[derive(Clone, Default)]
struct Snapshot {
    workloads: Vec<Workload>,
    policies: Vec<Policy>,
}

#[async_trait::async_trait]
impl WorkloadDirectory for Snapshot {
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Workload>> {
        Ok(self
            .workloads
            .iter()
            .find(|w| w.namespace == namespace && w.name == name)
            .cloned())
    }

    async fn list_by_selector(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Workload>> {
        Ok(self
            .workloads
            .iter()
            .filter(|w| w.namespace == namespace && selector.matches(&w.labels))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl PolicyStore for Snapshot {
    async fn list_in_namespace(&self, namespace: &str) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<Option<Policy>> {
        Ok(self
            .policies
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned())
    }
}

struct Unavailable;

#[async_trait::async_trait]
impl PolicyStore for Unavailable {
    async fn list_in_namespace(&self, _: &str) -> Result<Vec<Policy>> {
        Err(anyhow!("connection refused"))
    }

    async fn get_by_name(&self, _: &str, _: &str) -> Result<Option<Policy>> {
        Err(anyhow!("connection refused"))
    }
}

/// Succeeds or fails every probe; `Err(())` simulates a probe that never finishes.
struct FixedProber(Result<bool, ()>);

#[async_trait::async_trait]
impl Prober for FixedProber {
    async fn run(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ProbeError> {
        match self.0 {
            Ok(succeeded) => Ok(ProbeOutcome {
                output: format!("{}:{} open", request.address, request.port),
                succeeded,
            }),
            Err(()) => Err(ProbeError::Timeout(request.deadline())),
        }
    }
}
