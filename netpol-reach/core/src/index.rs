use crate::{Direction, Policy, Workload};
use tracing::trace;

/// Returns the policies that select `workload`, in their input order.
///
/// Only policies in the workload's own namespace are considered. A policy with an empty
/// selector selects every workload in its namespace.
pub fn matching_policies<'p>(
    workload: &Workload,
    policies: impl IntoIterator<Item = &'p Policy>,
) -> Vec<&'p Policy> {
    policies
        .into_iter()
        .filter(|policy| {
            if policy.namespace != workload.namespace {
                return false;
            }
            let selected = policy.selector.matches(&workload.labels);
            trace!(policy = %policy.name, workload = %workload.name, selected);
            selected
        })
        .collect()
}

/// Returns the names of the policies that govern `direction`.
///
/// A workload selected by any such policy is default-deny in that direction.
pub fn governing(policies: &[&Policy], direction: Direction) -> Vec<String> {
    policies
        .iter()
        .filter(|p| p.governs(direction))
        .map(|p| p.name.clone())
        .collect()
}
