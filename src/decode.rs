//! Turns the backend's boolean answer formulas back into rows.
//!
//! An answer is `false`, `true`, one conjunction of equalities, or a
//! disjunction of such conjunctions. Each equality constrains one projected
//! column, either exactly or on a sub-range of its bits; same-column
//! fragments of one conjunction are fused by bitwise or.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::One;

use crate::backend::{CmpOp, Term};
use crate::error::{Error, Result};

/// One column constraint of a decoded row. `mask` is present when only the
/// covered bits are constrained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub value: BigInt,
    pub mask: Option<BigInt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Bool(bool),
    /// One fragment per projected column, in projection order.
    Rows(Vec<Vec<Fragment>>),
}

pub fn decode(answer: &Term, columns: usize) -> Result<Decoded> {
    match answer {
        Term::True => Ok(Decoded::Bool(true)),
        Term::False => Ok(Decoded::Bool(false)),
        Term::Or(alternatives) => Ok(Decoded::Rows(
            alternatives
                .iter()
                .map(|alt| row(conjuncts(alt), columns))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(Decoded::Rows(vec![row(conjuncts(other), columns)?])),
    }
}

fn conjuncts(term: &Term) -> &[Term] {
    match term {
        Term::And(terms) => terms,
        single => std::slice::from_ref(single),
    }
}

fn row(conjuncts: &[Term], columns: usize) -> Result<Vec<Fragment>> {
    let mut acc: BTreeMap<usize, Fragment> = BTreeMap::new();
    for term in conjuncts {
        let (index, fragment) = fragment(term)?;
        match acc.remove(&index) {
            None => {
                acc.insert(index, fragment);
            }
            Some(existing) => {
                let mask = match (existing.mask, fragment.mask) {
                    (Some(a), Some(b)) => a | b,
                    _ => {
                        return Err(Error::NotWellFormed(format!(
                            "conflicting exact fragments for column {}",
                            index
                        )))
                    }
                };
                acc.insert(
                    index,
                    Fragment {
                        value: existing.value | fragment.value,
                        mask: Some(mask),
                    },
                );
            }
        }
    }
    (0..columns)
        .map(|i| {
            acc.remove(&i).ok_or_else(|| {
                Error::NotWellFormed(format!("answer leaves column {} unconstrained", i))
            })
        })
        .collect()
}

fn fragment(term: &Term) -> Result<(usize, Fragment)> {
    if let Term::Cmp {
        op: CmpOp::Eq,
        lhs,
        rhs,
    } = term
    {
        if let Some(found) = oriented(lhs, rhs).or_else(|| oriented(rhs, lhs)) {
            return Ok(found);
        }
    }
    Err(Error::NotWellFormed(format!(
        "cannot decode answer fragment {}",
        term
    )))
}

fn oriented(var_side: &Term, value_side: &Term) -> Option<(usize, Fragment)> {
    let value = match value_side {
        Term::Lit(v) => &v.bits,
        _ => return None,
    };
    match var_side {
        Term::BoundVar(index) => Some((
            *index,
            Fragment {
                value: value.clone(),
                mask: None,
            },
        )),
        Term::Extract { high, low, arg } => match arg.as_ref() {
            Term::BoundVar(index) => {
                let mask = (BigInt::one() << (*high + 1)) - (BigInt::one() << *low);
                Some((
                    *index,
                    Fragment {
                        value: value.clone() << *low,
                        mask: Some(mask),
                    },
                ))
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BvVal;

    fn exact(index: usize, value: i32, width: u32) -> Term {
        Term::eq(Term::BoundVar(index), Term::Lit(BvVal::new(value, width)))
    }

    fn extract(index: usize, high: u32, low: u32, value: i32) -> Term {
        Term::eq(
            Term::Extract {
                high,
                low,
                arg: Box::new(Term::BoundVar(index)),
            },
            Term::Lit(BvVal::new(value, high - low + 1)),
        )
    }

    #[test]
    fn booleans_pass_through() {
        assert_eq!(Decoded::Bool(true), decode(&Term::True, 0).unwrap());
        assert_eq!(Decoded::Bool(false), decode(&Term::False, 2).unwrap());
    }

    #[test]
    fn one_conjunction_is_one_row() {
        let answer = Term::And(vec![exact(0, 7, 32), exact(1, 3, 4)]);
        let decoded = decode(&answer, 2).unwrap();
        assert_eq!(
            Decoded::Rows(vec![vec![
                Fragment {
                    value: 7.into(),
                    mask: None
                },
                Fragment {
                    value: 3.into(),
                    mask: None
                },
            ]]),
            decoded
        );
    }

    #[test]
    fn disjoint_extracts_fuse_into_one_masked_value() {
        // high nibble 0xa, low nibble 0x5 of an 8-bit column.
        let answer = Term::And(vec![extract(0, 7, 4, 0xa), extract(0, 3, 0, 0x5)]);
        let decoded = decode(&answer, 1).unwrap();
        assert_eq!(
            Decoded::Rows(vec![vec![Fragment {
                value: 0xa5.into(),
                mask: Some(0xff.into())
            }]]),
            decoded
        );
    }

    #[test]
    fn masked_and_exact_columns_mix_in_one_row() {
        let answer = Term::And(vec![extract(0, 3, 2, 0x3), exact(1, 9, 32)]);
        match decode(&answer, 2).unwrap() {
            Decoded::Rows(rows) => {
                assert_eq!(Some(BigInt::from(0xc)), rows[0][0].mask);
                assert_eq!(BigInt::from(0xc), rows[0][0].value);
                assert_eq!(None, rows[0][1].mask);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn disjunctions_become_multiple_rows() {
        let answer = Term::Or(vec![exact(0, 1, 32), exact(0, 2, 32)]);
        match decode(&answer, 1).unwrap() {
            Decoded::Rows(rows) => assert_eq!(2, rows.len()),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn two_exact_fragments_for_one_column_are_rejected() {
        let answer = Term::And(vec![exact(0, 1, 32), exact(0, 2, 32)]);
        assert!(matches!(
            decode(&answer, 1),
            Err(Error::NotWellFormed(_))
        ));
    }

    #[test]
    fn unconstrained_columns_are_rejected() {
        let answer = exact(0, 1, 32);
        assert!(matches!(
            decode(&answer, 2),
            Err(Error::NotWellFormed(_))
        ));
    }
}
