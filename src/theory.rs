//! Compiles a whole program into an external fixed-point backend and decodes
//! query answers back into typed rows.
//!
//! Pipeline per theory instance: constant substitution, type inference,
//! unfold planning, projection reporting, relation registration, data
//! retrieval, rule compilation. Queries are then independent read-only
//! operations against the backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::debug;

use crate::ast::{Atom, Expr, FullId, Program, Rule, TableDecl, TableName, TypeName, TypedTable};
use crate::backend::{BvVal, FixpointBackend, Sort, Term};
use crate::decode::{self, Decoded};
use crate::error::{Error, Result};
use crate::parser;
use crate::primitives;
use crate::projection;
use crate::source::{DataSource, StaticSource};
use crate::typecheck;
use crate::types::{TypeRegistry, Value};
use crate::unfold::{environs, Environment, UnfoldPlan, Unfolding};

/// One result column: exact, or constrained only on the masked bits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryCell {
    Exact(Value),
    Masked(Value, Value),
}

impl fmt::Display for QueryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryCell::Exact(value) => write!(f, "{}", value),
            QueryCell::Masked(value, mask) => write!(f, "{}/{}", value, mask),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryAnswer {
    Bool(bool),
    Rows(Vec<Vec<QueryCell>>),
}

pub struct Theory<B> {
    backend: B,
    registry: TypeRegistry,
    rules: Vec<Rule>,
    decls: Vec<TableDecl>,
    tables: HashMap<TableName, TypedTable>,
    constants: HashMap<String, Expr>,
    plan: UnfoldPlan,
    environments: HashMap<usize, Vec<Environment>>,
}

impl<B: FixpointBackend> Theory<B> {
    /// Compiles `program` into `backend`, feeding extensional tables from the
    /// program's inline data rows.
    pub fn new(program: Program, backend: B) -> Result<Self> {
        let mut source = StaticSource::new(&program.tables)?;
        Self::with_source(program, backend, TypeRegistry::default(), &mut source)
    }

    pub fn with_source(
        mut program: Program,
        backend: B,
        registry: TypeRegistry,
        source: &mut dyn DataSource,
    ) -> Result<Self> {
        let constants: HashMap<String, Expr> = program.constants.iter().cloned().collect();
        substitute_constants(&mut program, &constants)?;
        for rule in &program.rules {
            if rule.head.negated {
                return Err(Error::NotWellFormed(format!(
                    "negated head in rule: {}",
                    rule
                )));
            }
        }
        let extensional: HashMap<TableName, Vec<TypeName>> = program
            .tables
            .iter()
            .map(|decl| {
                (
                    decl.name.clone(),
                    decl.fields.iter().map(|(_, tag)| tag.clone()).collect(),
                )
            })
            .collect();
        for rule in &program.rules {
            debug!("rule {}: {}", rule.id, rule);
        }
        let tables = typecheck::infer(&mut program.rules, &extensional, &registry)?;
        let mut unfolding = Unfolding::new(&program.rules, &extensional);
        let plan = unfolding.plan()?;
        let unfolded = plan.unfolded_variables();
        let projection = projection::compute(&program.rules, &unfolded);
        for (table, positions) in &projection.grounded {
            debug!("grounded columns of {}: {:?}", table, positions);
        }
        for (table, subsets) in &projection.partials {
            debug!("partial groundings of {}: {:?}", table, subsets);
        }

        let mut theory = Theory {
            backend,
            registry,
            rules: program.rules,
            decls: program.tables,
            tables,
            constants,
            plan,
            environments: HashMap::new(),
        };
        theory.build_relations()?;
        theory.retrieve_data(source)?;
        theory.environments = environs(&theory.plan)?;
        theory.build_rules()?;
        Ok(theory)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Registers one backend relation per table: the column sorts plus a
    /// trailing boolean.
    fn build_relations(&mut self) -> Result<()> {
        let mut tables: Vec<&TypedTable> = self.tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        for table in tables {
            let mut sorts = table
                .params
                .iter()
                .map(|tag| self.registry.sort(tag))
                .collect::<Result<Vec<_>>>()?;
            sorts.push(Sort::Bool);
            self.backend.register_relation(&table.name, sorts)?;
        }
        Ok(())
    }

    /// Asserts every extensional row as a backend fact; tables the unfold
    /// plan flags get their content captured on the way through.
    fn retrieve_data(&mut self, source: &mut dyn DataSource) -> Result<()> {
        for decl in &self.decls {
            let fields: Vec<String> = decl.fields.iter().map(|(name, _)| name.clone()).collect();
            let tags: Vec<TypeName> = decl.fields.iter().map(|(_, tag)| tag.clone()).collect();
            let needs_unfold = self
                .plan
                .tables
                .get(&decl.name)
                .map_or(false, |(_, flag)| *flag);
            let registry = &self.registry;
            let backend = &mut self.backend;
            let name = decl.name.clone();
            let mut captured: Vec<Vec<BvVal>> = Vec::new();
            let mut capture = |row: &[Value]| -> Result<()> {
                captured.push(convert_row(registry, &tags, row)?);
                Ok(())
            };
            let mut sink = |row: Vec<Value>| -> Result<()> {
                backend.assert_fact(&name, convert_row(registry, &tags, &row)?)
            };
            if needs_unfold {
                source.retrieve_table(&decl.name, &fields, &mut sink, Some(&mut capture))?;
                self.plan.contents.insert(decl.name.clone(), captured);
            } else {
                source.retrieve_table(&decl.name, &fields, &mut sink, None)?;
            }
        }
        Ok(())
    }

    /// Compiles every rule once per planned environment (or once with no
    /// bindings when the plan has nothing for it).
    fn build_rules(&mut self) -> Result<()> {
        let rules = std::mem::take(&mut self.rules);
        let empty = Environment::new();
        for rule in &rules {
            match self.environments.get(&rule.id) {
                Some(envs) => {
                    for env in envs.clone() {
                        let term = self.compile_rule(rule, &env)?;
                        debug!("assert {}", term);
                        self.backend.assert_rule(term)?;
                    }
                }
                None => {
                    let term = self.compile_rule(rule, &empty)?;
                    debug!("assert {}", term);
                    self.backend.assert_rule(term)?;
                }
            }
        }
        self.rules = rules;
        Ok(())
    }

    fn compile_rule(&self, rule: &Rule, env: &Environment) -> Result<Term> {
        let mut vars: BTreeMap<FullId, Term> = BTreeMap::new();
        let head = self.compile_atom(&rule.head, env, &mut vars)?;
        let body = rule
            .body
            .iter()
            .map(|atom| self.compile_atom(atom, env, &mut vars))
            .collect::<Result<Vec<_>>>()?;
        let inner = if body.is_empty() {
            head
        } else {
            Term::implies(conjunction(body), head)
        };
        let bound: Vec<Term> = vars.into_values().collect();
        Ok(if bound.is_empty() {
            inner
        } else {
            Term::ForAll(bound, Box::new(inner))
        })
    }

    fn compile_atom(
        &self,
        atom: &Atom,
        env: &Environment,
        vars: &mut BTreeMap<FullId, Term>,
    ) -> Result<Term> {
        let args = atom
            .args
            .iter()
            .map(|arg| self.compile_expr(arg, env, vars))
            .collect::<Result<Vec<_>>>()?;
        let term = if primitives::is_comparison(&atom.table) {
            primitives::comparison(&atom.table, args)?
        } else if self.tables.contains_key(&atom.table) {
            Term::App {
                relation: atom.table.clone(),
                args,
            }
        } else {
            return Err(Error::NotWellFormed(format!(
                "unknown relation in {}",
                atom
            )));
        };
        Ok(if atom.negated {
            Term::Not(Box::new(term))
        } else {
            term
        })
    }

    /// `vars` caches the backend constant per variable so repeated
    /// occurrences within one compiled rule share it.
    fn compile_expr(
        &self,
        expr: &Expr,
        env: &Environment,
        vars: &mut BTreeMap<FullId, Term>,
    ) -> Result<Term> {
        match expr {
            Expr::Variable(v) => {
                if let Some(value) = env.get(&v.full_id()) {
                    return Ok(Term::Lit(value.clone()));
                }
                let tag = v
                    .typ
                    .as_deref()
                    .ok_or_else(|| Error::Type(format!("untyped variable {}", v.name)))?;
                let sort = self.registry.sort(tag)?;
                let term = vars.entry(v.full_id()).or_insert_with(|| Term::Const {
                    name: format!("{}!{}", v.name, v.rule),
                    sort,
                });
                Ok(term.clone())
            }
            Expr::Operation { op, args, .. } => {
                let args = args
                    .iter()
                    .map(|arg| self.compile_expr(arg, env, vars))
                    .collect::<Result<Vec<_>>>()?;
                primitives::operation(op, args)
            }
            Expr::Const(name) => Err(Error::NotWellFormed(format!(
                "unresolved constant {}",
                name
            ))),
            literal => {
                let tag = literal
                    .typ()
                    .ok_or_else(|| Error::Type(format!("untyped literal {}", literal)))?;
                let value = Value::from_literal(literal).ok_or_else(|| {
                    Error::NotWellFormed(format!("not a literal: {}", literal))
                })?;
                Ok(Term::Lit(self.registry.get(tag)?.to_backend(&value)?))
            }
        }
    }

    /// Runs one atom-shaped query. Returns the projected variable names in
    /// first-occurrence order together with the decoded answer.
    pub fn query(&mut self, text: &str) -> Result<(Vec<String>, QueryAnswer)> {
        let mut atom = parser::parse_query(text)?;
        substitute_atom(&mut atom, &self.constants)?;
        let params = self
            .tables
            .get(&atom.table)
            .ok_or_else(|| Error::NotWellFormed(format!("unknown relation in query {}", atom)))?
            .params
            .clone();
        if atom.args.len() != params.len() {
            return Err(Error::NotWellFormed(format!(
                "arity mismatch in query {}: {} expects {} arguments",
                atom,
                atom.table,
                params.len()
            )));
        }
        for (arg, tag) in atom.args.iter_mut().zip(&params) {
            if let Some(own) = arg.typ() {
                if own != tag {
                    return Err(Error::Type(format!(
                        "query argument {} is a {} but the column expects {}",
                        arg, own, tag
                    )));
                }
            }
            type_query_arg(arg, tag);
        }

        let mut names: Vec<String> = Vec::new();
        let mut tags: Vec<TypeName> = Vec::new();
        let mut seen: BTreeSet<FullId> = BTreeSet::new();
        for (arg, tag) in atom.args.iter().zip(&params) {
            if let Expr::Variable(v) = arg {
                if seen.insert(v.full_id()) {
                    names.push(v.name.clone());
                    tags.push(tag.clone());
                }
            }
        }

        let mut vars = BTreeMap::new();
        let goal = self.compile_atom(&atom, &Environment::new(), &mut vars)?;
        let bound: Vec<Term> = vars.into_values().collect();
        let goal = if bound.is_empty() {
            goal
        } else {
            Term::Exists(bound, Box::new(goal))
        };
        debug!("compiled query: {}", goal);
        let answer = self.backend.query(goal)?;
        debug!("answer formula: {}", answer);

        match decode::decode(&answer, names.len())? {
            Decoded::Bool(b) => Ok((names, QueryAnswer::Bool(b))),
            Decoded::Rows(rows) => {
                let mut out = Vec::new();
                for row in rows {
                    let mut cells = Vec::new();
                    for (fragment, tag) in row.into_iter().zip(&tags) {
                        let adapter = self.registry.get(tag)?;
                        let width = match adapter.sort() {
                            Sort::BitVec(w) => w,
                            Sort::Bool => 1,
                        };
                        let value = adapter.from_backend(&BvVal::new(fragment.value, width));
                        cells.push(match fragment.mask {
                            Some(mask) => QueryCell::Masked(
                                value,
                                adapter.from_backend(&BvVal::new(mask, width)),
                            ),
                            None => QueryCell::Exact(value),
                        });
                    }
                    out.push(cells);
                }
                Ok((names, QueryAnswer::Rows(out)))
            }
        }
    }
}

fn conjunction(mut terms: Vec<Term>) -> Term {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        Term::And(terms)
    }
}

fn type_query_arg(arg: &mut Expr, tag: &str) {
    arg.set_typ(tag);
    if let Expr::Operation { args, .. } = arg {
        for arg in args {
            type_query_arg(arg, tag);
        }
    }
}

fn substitute_constants(program: &mut Program, constants: &HashMap<String, Expr>) -> Result<()> {
    for rule in &mut program.rules {
        substitute_atom(&mut rule.head, constants)?;
        for atom in &mut rule.body {
            substitute_atom(atom, constants)?;
        }
    }
    Ok(())
}

fn substitute_atom(atom: &mut Atom, constants: &HashMap<String, Expr>) -> Result<()> {
    for arg in &mut atom.args {
        substitute_expr(arg, constants)?;
    }
    Ok(())
}

fn substitute_expr(expr: &mut Expr, constants: &HashMap<String, Expr>) -> Result<()> {
    match expr {
        Expr::Const(name) => {
            let value = constants.get(name).cloned().ok_or_else(|| {
                Error::NotWellFormed(format!("unknown constant {}", name))
            })?;
            *expr = value;
            Ok(())
        }
        Expr::Operation { args, .. } => {
            for arg in args {
                substitute_expr(arg, constants)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn convert_row(registry: &TypeRegistry, tags: &[TypeName], row: &[Value]) -> Result<Vec<BvVal>> {
    if row.len() != tags.len() {
        return Err(Error::NotWellFormed(format!(
            "row has {} values for {} columns",
            row.len(),
            tags.len()
        )));
    }
    row.iter()
        .zip(tags)
        .map(|(value, tag)| registry.get(tag)?.to_backend(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::parser::parse_program;

    #[test]
    fn extensional_tables_cannot_be_redefined_by_rules() {
        let program = parse_program("data p(x: int);\np(1) :- q(1).").unwrap();
        assert!(matches!(
            Theory::new(program, RecordingBackend::new()),
            Err(Error::NotWellFormed(_))
        ));
    }

    #[test]
    fn negated_head_is_rejected() {
        let mut program = parse_program("data p(x: int);\nt(X) :- p(X).").unwrap();
        program.rules[0].head.negated = true;
        assert!(matches!(
            Theory::new(program, RecordingBackend::new()),
            Err(Error::NotWellFormed(_))
        ));
    }

    #[test]
    fn unknown_constant_is_rejected() {
        let program = parse_program("data p(x: int);\nt(X) :- p(X), X = missing.").unwrap();
        assert!(matches!(
            Theory::new(program, RecordingBackend::new()),
            Err(Error::NotWellFormed(_))
        ));
    }

    #[test]
    fn bodyless_rules_compile_to_their_head_alone() {
        let program = parse_program("data p(x: int) = (1);\nt(2) :- p(1).\ns(3).").unwrap();
        let theory = Theory::new(program, RecordingBackend::new()).unwrap();
        let compiled = &theory.backend().rules;
        assert_eq!(2, compiled.len());
        assert!(matches!(compiled[0], Term::Implies(_, _)));
        assert!(matches!(
            compiled[1],
            Term::App { ref relation, .. } if relation == "s"
        ));
    }
}
