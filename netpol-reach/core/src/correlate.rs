use crate::{Direction, ExtractedRule, Protocol};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// A non-owning handle to an extracted rule.
///
/// An evaluation produces at most one rule per policy and workload in each direction, so the
/// policy name and the workload identify a rule regardless of which object represents it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RuleKey {
    pub policy: String,
    pub namespace: String,
    pub workload: String,
}

/// Holds the egress rules of a source and the ingress rules of a target.
///
/// Correlations are stored on each rule as `RuleKey`s that resolve against the opposite list, so
/// the association can be walked from either end without the rules owning each other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Evidence {
    pub egress: Vec<ExtractedRule>,
    pub ingress: Vec<ExtractedRule>,
}

// === impl Evidence ===

impl Evidence {
    pub fn new(egress: Vec<ExtractedRule>, ingress: Vec<ExtractedRule>) -> Self {
        Self { egress, ingress }
    }

    pub fn rules(&self, direction: Direction) -> &[ExtractedRule] {
        match direction {
            Direction::Egress => &self.egress,
            Direction::Ingress => &self.ingress,
        }
    }

    /// Links every egress rule with every ingress rule such that the egress rule permits the
    /// ingress rule's workload and the ingress rule permits the egress rule's workload.
    ///
    /// Links are recorded on both rules and are never duplicated, so calling this repeatedly is
    /// harmless.
    pub fn correlate(&mut self) {
        let mut pairs = Vec::new();
        for (e, egress) in self.egress.iter().enumerate() {
            for (i, ingress) in self.ingress.iter().enumerate() {
                if egress.admits(&ingress.workload) && ingress.admits(&egress.workload) {
                    debug!(egress = %egress.policy, ingress = %ingress.policy, "Correlated");
                    pairs.push((e, i));
                }
            }
        }

        for (e, i) in pairs {
            let egress_key = self.egress[e].key();
            let ingress_key = self.ingress[i].key();
            self.egress[e].link(ingress_key);
            self.ingress[i].link(egress_key);
        }
    }

    /// Resolves the correlated handles of `rule` against the opposite list.
    pub fn correlated<'a>(
        &'a self,
        rule: &'a ExtractedRule,
    ) -> impl Iterator<Item = &'a ExtractedRule> + 'a {
        let opposite = self.rules(rule.direction.opposite());
        rule.correlated
            .iter()
            .filter_map(move |key| opposite.iter().find(|r| r.key() == *key))
    }

    /// Returns the `direction` rules that correlate with at least one opposite rule for `port`
    /// and `protocol`: the complete allow-paths.
    pub fn filter_correlated(
        &self,
        direction: Direction,
        port: u16,
        protocol: Protocol,
    ) -> Vec<&ExtractedRule> {
        self.rules(direction)
            .iter()
            .filter(|rule| {
                self.correlated(rule)
                    .any(|o| o.query.port == port && o.query.protocol == protocol)
            })
            .collect()
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.policy, self.workload)
    }
}
