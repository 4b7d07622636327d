//! Finds head-argument columns that are always ground so relations can later
//! be split into lower-arity specializations. Reporting only: no rewriting
//! happens here.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::ast::{Expr, FullId, Rule, TableName};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectionResult {
    /// Head-argument positions that are ground in every rule defining the
    /// table. A table with no defining rules has no entry.
    pub grounded: BTreeMap<TableName, BTreeSet<usize>>,
    /// Per body occurrence of a table: the grounded positions still occupied
    /// by a variable at that occurrence, the candidate splitting payloads.
    /// Empty subsets are not recorded.
    pub partials: BTreeMap<TableName, BTreeSet<BTreeSet<usize>>>,
}

/// `unfolded` holds the variables the unfold plan resolves to constants;
/// they count as ground everywhere.
pub fn compute(rules: &[Rule], unfolded: &BTreeSet<FullId>) -> ProjectionResult {
    let is_ground = |term: &Expr| match term {
        Expr::Variable(v) => unfolded.contains(&v.full_id()),
        _ => true,
    };

    let mut sorted: Vec<&Rule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.head.table.clone());

    let grounded: BTreeMap<TableName, BTreeSet<usize>> = sorted
        .iter()
        .group_by(|r| r.head.table.clone())
        .into_iter()
        .map(|(table, group)| {
            let positions = group
                .map(|r| {
                    r.head
                        .args
                        .iter()
                        .enumerate()
                        .filter(|(_, arg)| is_ground(arg))
                        .map(|(i, _)| i)
                        .collect::<BTreeSet<usize>>()
                })
                .reduce(|a, b| a.intersection(&b).copied().collect())
                .unwrap_or_default();
            (table, positions)
        })
        .collect();

    let mut partials: BTreeMap<TableName, BTreeSet<BTreeSet<usize>>> = BTreeMap::new();
    for rule in rules {
        for atom in &rule.body {
            let known = match grounded.get(&atom.table) {
                Some(known) => known,
                None => continue,
            };
            let partial: BTreeSet<usize> = known
                .iter()
                .copied()
                .filter(|i| atom.args.get(*i).map_or(false, |arg| !is_ground(arg)))
                .collect();
            if !partial.is_empty() {
                partials.entry(atom.table.clone()).or_default().insert(partial);
            }
        }
    }

    ProjectionResult { grounded, partials }
}
