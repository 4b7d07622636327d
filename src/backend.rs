//! The interface the core needs from the external fixed-point solver.
//!
//! Assertions and answer formulas are values of [`Term`]; a real solver
//! binding implements [`FixpointBackend`] by translating terms into its own
//! expression language. [`RecordingBackend`] stores whatever it is given and
//! answers queries from a scripted formula; the binary's compile-only mode
//! and the integration tests run on it.

use std::fmt;

use num_bigint::BigInt;
use num_traits::One;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sort {
    BitVec(u32),
    Bool,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::BitVec(w) => write!(f, "(_ BitVec {})", w),
            Sort::Bool => write!(f, "Bool"),
        }
    }
}

/// A fixed-width bit-vector value. `bits` is always reduced to the unsigned
/// canonical representative modulo `2^width`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BvVal {
    pub bits: BigInt,
    pub width: u32,
}

impl BvVal {
    pub fn new(bits: impl Into<BigInt>, width: u32) -> Self {
        let modulus = BigInt::one() << width;
        let mut bits = bits.into() % &modulus;
        if bits.sign() == num_bigint::Sign::Minus {
            bits += &modulus;
        }
        BvVal { bits, width }
    }

    pub fn sort(&self) -> Sort {
        Sort::BitVec(self.width)
    }
}

impl fmt::Display for BvVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(_ bv{} {})", self.bits, self.width)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BvOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
}

impl BvOp {
    fn name(self) -> &'static str {
        match self {
            BvOp::And => "bvand",
            BvOp::Or => "bvor",
            BvOp::Xor => "bvxor",
            BvOp::Add => "bvadd",
            BvOp::Sub => "bvsub",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "distinct",
            CmpOp::Lt => "bvult",
            CmpOp::Le => "bvule",
            CmpOp::Gt => "bvugt",
            CmpOp::Ge => "bvuge",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    Lit(BvVal),
    /// Named constant scoped to one compiled rule or query.
    Const { name: String, sort: Sort },
    /// De Bruijn-style variable index, as used in answer formulas.
    BoundVar(usize),
    /// Bit sub-range `low..=high` of `arg`.
    Extract {
        high: u32,
        low: u32,
        arg: Box<Term>,
    },
    BvOp { op: BvOp, args: Vec<Term> },
    Cmp {
        op: CmpOp,
        lhs: Box<Term>,
        rhs: Box<Term>,
    },
    /// Relation application.
    App { relation: String, args: Vec<Term> },
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),
    ForAll(Vec<Term>, Box<Term>),
    Exists(Vec<Term>, Box<Term>),
    True,
    False,
}

impl Term {
    pub fn eq(lhs: Term, rhs: Term) -> Term {
        Term::Cmp {
            op: CmpOp::Eq,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn implies(body: Term, head: Term) -> Term {
        Term::Implies(Box::new(body), Box::new(head))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, head: &str, args: &[Term]) -> fmt::Result {
            write!(f, "({}", head)?;
            for arg in args {
                write!(f, " {}", arg)?;
            }
            write!(f, ")")
        }
        fn quant(f: &mut fmt::Formatter<'_>, kw: &str, vars: &[Term], body: &Term) -> fmt::Result {
            write!(f, "({} (", kw)?;
            for (i, var) in vars.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                match var {
                    Term::Const { name, sort } => write!(f, "({} {})", name, sort)?,
                    other => write!(f, "{}", other)?,
                }
            }
            write!(f, ") {})", body)
        }
        match self {
            Term::Lit(v) => write!(f, "{}", v),
            Term::Const { name, .. } => write!(f, "{}", name),
            Term::BoundVar(i) => write!(f, "(:var {})", i),
            Term::Extract { high, low, arg } => {
                write!(f, "((_ extract {} {}) {})", high, low, arg)
            }
            Term::BvOp { op, args } => seq(f, op.name(), args),
            Term::Cmp { op, lhs, rhs } => {
                write!(f, "({} {} {})", op.name(), lhs, rhs)
            }
            Term::App { relation, args } => seq(f, relation, args),
            Term::Not(t) => write!(f, "(not {})", t),
            Term::And(ts) => seq(f, "and", ts),
            Term::Or(ts) => seq(f, "or", ts),
            Term::Implies(a, b) => write!(f, "(=> {} {})", a, b),
            Term::ForAll(vars, body) => quant(f, "forall", vars, body),
            Term::Exists(vars, body) => quant(f, "exists", vars, body),
            Term::True => write!(f, "true"),
            Term::False => write!(f, "false"),
        }
    }
}

/// One solver context per theory instance; never shared across theories.
pub trait FixpointBackend {
    fn register_relation(&mut self, name: &str, sorts: Vec<Sort>) -> Result<()>;
    fn assert_fact(&mut self, table: &str, row: Vec<BvVal>) -> Result<()>;
    fn assert_rule(&mut self, rule: Term) -> Result<()>;
    /// Submits a compiled query and returns the boolean answer formula.
    fn query(&mut self, goal: Term) -> Result<Term>;
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub relations: Vec<(String, Vec<Sort>)>,
    pub facts: Vec<(String, Vec<BvVal>)>,
    pub rules: Vec<Term>,
    pub queries: Vec<Term>,
    answer: Option<Term>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        RecordingBackend::default()
    }

    /// Makes subsequent queries answer with `formula`.
    pub fn script_answer(&mut self, formula: Term) {
        self.answer = Some(formula);
    }
}

impl FixpointBackend for RecordingBackend {
    fn register_relation(&mut self, name: &str, sorts: Vec<Sort>) -> Result<()> {
        self.relations.push((name.to_owned(), sorts));
        Ok(())
    }

    fn assert_fact(&mut self, table: &str, row: Vec<BvVal>) -> Result<()> {
        self.facts.push((table.to_owned(), row));
        Ok(())
    }

    fn assert_rule(&mut self, rule: Term) -> Result<()> {
        self.rules.push(rule);
        Ok(())
    }

    fn query(&mut self, goal: Term) -> Result<Term> {
        self.queries.push(goal);
        Ok(self.answer.clone().unwrap_or(Term::False))
    }
}
