use std::collections::BTreeSet;

use crate::intent::{Constraint, PolicyIntent};
use crate::records::ImplementationRecord;

/// Names of every target group whose criteria the record satisfies.
pub fn classify(record: &ImplementationRecord, intent: &PolicyIntent) -> BTreeSet<String> {
    intent
        .target_groups()
        .iter()
        .filter(|group| group.criteria.matches(record))
        .map(|group| group.name.clone())
        .collect()
}

/// Union of constraints for all held groups plus wildcard constraints, in
/// declaration order with their declaration index.
pub fn applicable_constraints<'a>(
    intent: &'a PolicyIntent,
    groups: &BTreeSet<String>,
) -> Vec<(usize, &'a Constraint)> {
    intent.constraints_for(groups)
}
