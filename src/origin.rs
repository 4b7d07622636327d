//! Lattice algebra describing where a table column's value can come from.
//!
//! `Disj` and `Conj` keep their members in source order; set semantics
//! (structural deduplication, absorption) are applied by [`reduce_disj`] and
//! [`reduce_conj`], not by the representation itself.

use std::fmt;

/// Opaque injection tag. Each union-selection layer a value traverses
/// prepends one mark, so the value can be re-wrapped or unwrapped later.
pub type Mark = String;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginType {
    /// The value, when variable, is sourced from `pos` of `table`, having
    /// passed through the `marks` chain (most recent layer first).
    Ground {
        table: String,
        pos: usize,
        marks: Vec<Mark>,
    },
    /// The value may originate from any one alternative.
    Disj(Vec<OriginType>),
    /// The value must satisfy all terms simultaneously.
    Conj(Vec<OriginType>),
    /// No provenance constraint known.
    Bottom,
    /// Fully unconstrained; annihilates a disjunction it appears in.
    Top,
}

impl OriginType {
    pub fn ground(table: impl Into<String>, pos: usize) -> Self {
        OriginType::Ground {
            table: table.into(),
            pos,
            marks: Vec::new(),
        }
    }

    pub fn ground_marked(table: impl Into<String>, pos: usize, marks: Vec<Mark>) -> Self {
        OriginType::Ground {
            table: table.into(),
            pos,
            marks,
        }
    }

    /// Total order key used to pick the simplest of two interchangeable
    /// descriptions: lower rank wins, ties broken by smaller size.
    pub fn weight(&self) -> (u8, usize) {
        match self {
            OriginType::Ground { .. } => (0, 1),
            OriginType::Disj(members) | OriginType::Conj(members) => (1, members.len()),
            OriginType::Bottom => (2, 0),
            OriginType::Top => (3, 0),
        }
    }

    /// Copy of `self` with `mark` prepended to the mark chain of every
    /// reachable `Ground` leaf. `Bottom` and `Top` are unchanged.
    pub fn wrap(&self, mark: &str) -> Self {
        match self {
            OriginType::Ground { table, pos, marks } => {
                let mut chain = Vec::with_capacity(marks.len() + 1);
                chain.push(mark.to_owned());
                chain.extend(marks.iter().cloned());
                OriginType::Ground {
                    table: table.clone(),
                    pos: *pos,
                    marks: chain,
                }
            }
            OriginType::Disj(members) => {
                OriginType::Disj(members.iter().map(|m| m.wrap(mark)).collect())
            }
            OriginType::Conj(members) => {
                OriginType::Conj(members.iter().map(|m| m.wrap(mark)).collect())
            }
            OriginType::Bottom => OriginType::Bottom,
            OriginType::Top => OriginType::Top,
        }
    }
}

pub fn chain_length(marks: &[Mark]) -> usize {
    marks.len()
}

/// Immediate non-`Conj` leaves of a possibly nested conjunction, in order and
/// with duplicates preserved. Nested `Conj` members are spliced in place,
/// `Bottom` leaves are dropped (they carry no constraint), `Disj` and
/// `Ground` leaves are kept opaque.
pub fn flatten_conjuncts(t: &OriginType) -> Vec<OriginType> {
    fn walk(t: &OriginType, out: &mut Vec<OriginType>) {
        match t {
            OriginType::Conj(members) => {
                for m in members {
                    walk(m, out);
                }
            }
            OriginType::Bottom => {}
            other => out.push(other.clone()),
        }
    }
    let mut out = Vec::new();
    walk(t, &mut out);
    out
}

/// Flattens nested `Disj` members, deduplicates by structural equality, and
/// collapses to `Top` when `Top` is among the members.
pub fn reduce_disj(terms: impl IntoIterator<Item = OriginType>) -> OriginType {
    fn walk(t: OriginType, out: &mut Vec<OriginType>) {
        match t {
            OriginType::Disj(members) => {
                for m in members {
                    walk(m, out);
                }
            }
            other => {
                if !out.contains(&other) {
                    out.push(other);
                }
            }
        }
    }
    let mut members = Vec::new();
    for t in terms {
        walk(t, &mut members);
    }
    if members.contains(&OriginType::Top) {
        return OriginType::Top;
    }
    match members.len() {
        0 => OriginType::Bottom,
        1 => members.pop().unwrap(),
        _ => OriginType::Disj(members),
    }
}

/// Flattens nested `Conj` members, deduplicates, then absorbs: a `Disj`
/// member is dropped when one of its alternatives is itself another member
/// (`X ∧ (X ∨ Y) ≡ X`).
pub fn reduce_conj(terms: impl IntoIterator<Item = OriginType>) -> OriginType {
    let mut members = Vec::new();
    for t in terms {
        for leaf in flatten_conjuncts(&t) {
            if !members.contains(&leaf) {
                members.push(leaf);
            }
        }
    }
    let absorbed: Vec<bool> = members
        .iter()
        .enumerate()
        .map(|(i, m)| match m {
            OriginType::Disj(alts) => members
                .iter()
                .enumerate()
                .any(|(j, other)| i != j && alts.contains(other)),
            _ => false,
        })
        .collect();
    let mut members: Vec<OriginType> = members
        .into_iter()
        .zip(absorbed)
        .filter_map(|(m, dead)| (!dead).then(|| m))
        .collect();
    match members.len() {
        0 => OriginType::Bottom,
        1 => members.pop().unwrap(),
        _ => OriginType::Conj(members),
    }
}

impl fmt::Display for OriginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn members(f: &mut fmt::Formatter<'_>, ms: &[OriginType], sep: &str) -> fmt::Result {
            for (i, m) in ms.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", sep)?;
                }
                write!(f, "{}", m)?;
            }
            Ok(())
        }
        match self {
            OriginType::Ground { table, pos, marks } => {
                write!(f, "{}[{}]", table, pos)?;
                for mark in marks {
                    write!(f, "^{}", mark)?;
                }
                Ok(())
            }
            OriginType::Disj(ms) => {
                write!(f, "(")?;
                members(f, ms, " | ")?;
                write!(f, ")")
            }
            OriginType::Conj(ms) => {
                write!(f, "(")?;
                members(f, ms, " & ")?;
                write!(f, ")")
            }
            OriginType::Bottom => write!(f, "_"),
            OriginType::Top => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g1() -> OriginType {
        OriginType::ground("t", 1)
    }

    fn g2() -> OriginType {
        OriginType::ground("u", 2)
    }

    #[test]
    fn flatten_splices_conjunctions_and_drops_bottom() {
        let disj = OriginType::Disj(vec![g1(), g2()]);
        let nested = OriginType::Conj(vec![
            g1(),
            OriginType::Conj(vec![g2(), g1()]),
            OriginType::Bottom,
            disj.clone(),
        ]);
        assert_eq!(vec![g1(), g2(), g1(), disj], flatten_conjuncts(&nested));
    }

    #[test]
    fn chain_length_counts_marks() {
        assert_eq!(0, chain_length(&[]));
        assert_eq!(1, chain_length(&["m".to_owned()]));
        assert_eq!(2, chain_length(&["n".to_owned(), "m".to_owned()]));
    }

    #[test]
    fn weight_orders_ground_below_compounds_below_bottom() {
        let marked = OriginType::ground_marked("t", 1, vec!["m".to_owned()]);
        let disj = OriginType::Disj(vec![marked.clone(), OriginType::Bottom]);
        let conj = OriginType::Conj(vec![marked.clone(), OriginType::Bottom, marked.clone()]);
        assert_eq!((0, 1), marked.weight());
        assert_eq!((2, 0), OriginType::Bottom.weight());
        assert_eq!((1, 2), disj.weight());
        assert_eq!((1, 3), conj.weight());
        assert!(marked.weight() < disj.weight());
        assert!(disj.weight() < OriginType::Bottom.weight());
    }

    #[test]
    fn wrap_prepends_to_every_ground_leaf() {
        let marked = OriginType::ground_marked("t", 1, vec!["n".to_owned()]);
        let input = OriginType::Conj(vec![
            g1(),
            OriginType::Conj(vec![marked.clone(), g1()]),
            OriginType::Bottom,
            OriginType::Disj(vec![g1(), marked]),
        ]);
        let e1 = OriginType::ground_marked("t", 1, vec!["m".to_owned()]);
        let e2 = OriginType::ground_marked("t", 1, vec!["m".to_owned(), "n".to_owned()]);
        let expected = OriginType::Conj(vec![
            e1.clone(),
            OriginType::Conj(vec![e2.clone(), e1.clone()]),
            OriginType::Bottom,
            OriginType::Disj(vec![e1, e2]),
        ]);
        assert_eq!(expected, input.wrap("m"));
    }

    #[test]
    fn reduce_disj_flattens_and_deduplicates() {
        let t4 = OriginType::Disj(vec![g1(), g2()]);
        let t5 = OriginType::Disj(vec![g1(), OriginType::Bottom]);
        match reduce_disj([t4, g1(), t5]) {
            OriginType::Disj(members) => assert_eq!(3, members.len()),
            other => panic!("expected a disjunction, got {}", other),
        }
    }

    #[test]
    fn reduce_disj_collapses_on_top() {
        let t4 = OriginType::Disj(vec![g1(), g2()]);
        let t6 = OriginType::Disj(vec![g1(), OriginType::Top]);
        assert_eq!(OriginType::Top, reduce_disj([t4, g1(), t6]));
    }

    #[test]
    fn reduce_conj_absorbs_overlapping_disjunctions() {
        let g3 = OriginType::ground("v", 2);
        let t4 = OriginType::Disj(vec![g1(), g2()]);
        let t5 = OriginType::Disj(vec![g1(), g3]);
        match reduce_conj([g1(), g2(), t4, t5]) {
            OriginType::Conj(members) => assert_eq!(vec![g1(), g2()], members),
            other => panic!("expected a conjunction, got {}", other),
        }
    }
}
