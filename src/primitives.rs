//! Fixed registries of surface operators and built-in comparison predicates.

use crate::backend::{BvOp, CmpOp, Term};
use crate::error::{Error, Result};

/// Backend builder for an n-ary surface operator.
pub fn operation(op: &str, args: Vec<Term>) -> Result<Term> {
    let op = match op {
        "&" => BvOp::And,
        "|" => BvOp::Or,
        "^" => BvOp::Xor,
        "+" => BvOp::Add,
        "-" => BvOp::Sub,
        other => {
            return Err(Error::NotWellFormed(format!(
                "unknown operator {}",
                other
            )))
        }
    };
    Ok(Term::BvOp { op, args })
}

/// Table names that denote built-in comparison predicates rather than
/// relations.
pub fn is_comparison(table: &str) -> bool {
    matches!(table, "=" | "!=" | "<" | "<=" | ">" | ">=")
}

/// The masked-merge operator scanned for by the unfold planner.
pub const MASK_OP: &str = "&";

pub fn comparison(table: &str, mut args: Vec<Term>) -> Result<Term> {
    if args.len() != 2 {
        return Err(Error::NotWellFormed(format!(
            "comparison {} expects 2 arguments, got {}",
            table,
            args.len()
        )));
    }
    let rhs = args.pop().unwrap();
    let lhs = args.pop().unwrap();
    let op = match table {
        "=" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        other => {
            return Err(Error::NotWellFormed(format!(
                "unknown comparison {}",
                other
            )))
        }
    };
    Ok(Term::Cmp {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}
