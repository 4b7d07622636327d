//! Type-tag inference for rules: every column, variable and literal must end
//! up with a known tag before anything is submitted to the backend.

use std::collections::HashMap;

use crate::ast::{Atom, Expr, FullId, Rule, TableName, TypeName, TypedTable};
use crate::error::{Error, Result};
use crate::primitives;
use crate::types::TypeRegistry;

struct Checker<'a> {
    registry: &'a TypeRegistry,
    table_types: HashMap<TableName, Vec<Option<TypeName>>>,
    var_types: HashMap<FullId, TypeName>,
    changed: bool,
}

/// Infers the column types of every table from the extensional schemas and
/// the rules, writes the results back into the expressions, and returns the
/// typed tables. Arity mismatches and type conflicts are fatal.
pub fn infer(
    rules: &mut [Rule],
    extensional: &HashMap<TableName, Vec<TypeName>>,
    registry: &TypeRegistry,
) -> Result<HashMap<TableName, TypedTable>> {
    let mut checker = Checker {
        registry,
        table_types: HashMap::new(),
        var_types: HashMap::new(),
        changed: false,
    };
    for (name, params) in extensional {
        for tag in params {
            if !registry.knows(tag) {
                return Err(Error::Type(format!(
                    "unknown type {} in declaration of {}",
                    tag, name
                )));
            }
        }
        checker.table_types.insert(
            name.clone(),
            params.iter().cloned().map(Some).collect(),
        );
    }

    let max_rounds = 2 * rules.len() + 2;
    checker.run(rules, max_rounds)?;

    // Bare numeric literals in otherwise untyped columns default to int.
    let mut defaulted = false;
    for rule in rules.iter() {
        for atom in std::iter::once(&rule.head).chain(rule.body.iter()) {
            if primitives::is_comparison(&atom.table) {
                continue;
            }
            for (i, arg) in atom.args.iter().enumerate() {
                if matches!(arg, Expr::Num { .. })
                    && checker.table_types[&atom.table][i].is_none()
                {
                    checker.table_types.get_mut(&atom.table).unwrap()[i] =
                        Some("int".to_owned());
                    defaulted = true;
                }
            }
        }
    }
    if defaulted {
        checker.run(rules, max_rounds)?;
    }

    for (table, cols) in &checker.table_types {
        for (i, col) in cols.iter().enumerate() {
            if col.is_none() {
                return Err(Error::Type(format!(
                    "cannot infer the type of {} column {}",
                    table, i
                )));
            }
        }
    }

    for rule in rules.iter_mut() {
        checker.write_back(rule)?;
    }

    Ok(checker
        .table_types
        .into_iter()
        .map(|(name, cols)| {
            let params = cols.into_iter().flatten().collect();
            (name.clone(), TypedTable { name, params })
        })
        .collect())
}

impl Checker<'_> {
    fn run(&mut self, rules: &[Rule], max_rounds: usize) -> Result<()> {
        for _ in 0..max_rounds {
            self.changed = false;
            for rule in rules.iter() {
                self.visit_rule(rule)?;
            }
            if !self.changed {
                break;
            }
        }
        Ok(())
    }

    fn visit_rule(&mut self, rule: &Rule) -> Result<()> {
        self.visit_atom(&rule.head)?;
        for atom in &rule.body {
            self.visit_atom(atom)?;
        }
        Ok(())
    }

    fn visit_atom(&mut self, atom: &Atom) -> Result<()> {
        if primitives::is_comparison(&atom.table) {
            let known = atom
                .args
                .iter()
                .find_map(|arg| self.expr_type(arg));
            if let Some(tag) = known {
                for arg in &atom.args {
                    self.assign(arg, &tag)?;
                }
            }
            return Ok(());
        }

        let arity = atom.args.len();
        match self.table_types.get(&atom.table) {
            Some(cols) if cols.len() != arity => {
                return Err(Error::NotWellFormed(format!(
                    "arity mismatch for {}: expected {} arguments in {}",
                    atom.table,
                    cols.len(),
                    atom
                )))
            }
            Some(_) => {}
            None => {
                self.table_types
                    .insert(atom.table.clone(), vec![None; arity]);
                self.changed = true;
            }
        }

        for i in 0..arity {
            let col = self.table_types[&atom.table][i].clone();
            match col {
                Some(tag) => self.assign(&atom.args[i], &tag)?,
                None => {
                    if let Some(tag) = self.expr_type(&atom.args[i]) {
                        if !self.registry.knows(&tag) {
                            return Err(Error::Type(format!(
                                "unknown type {} in {}",
                                tag, atom
                            )));
                        }
                        self.table_types.get_mut(&atom.table).unwrap()[i] = Some(tag);
                        self.changed = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn expr_type(&self, expr: &Expr) -> Option<TypeName> {
        match expr {
            Expr::Variable(v) => v
                .typ
                .clone()
                .or_else(|| self.var_types.get(&v.full_id()).cloned()),
            Expr::Operation { args, typ, .. } => typ
                .clone()
                .or_else(|| args.iter().find_map(|a| self.expr_type(a))),
            Expr::Num { typ, .. } => typ.clone(),
            other => other.typ().map(str::to_owned),
        }
    }

    /// Pushes `tag` into an expression: variables record it, fixed-type
    /// literals must agree with it, operands of an operation share it.
    fn assign(&mut self, expr: &Expr, tag: &str) -> Result<()> {
        match expr {
            Expr::Variable(v) => {
                if let Some(declared) = &v.typ {
                    if declared != tag {
                        return Err(Error::Type(format!(
                            "variable {} declared {} but used as {}",
                            v.name, declared, tag
                        )));
                    }
                }
                match self.var_types.get(&v.full_id()) {
                    Some(known) if known != tag => {
                        return Err(Error::Type(format!(
                            "variable {} used both as {} and {}",
                            v.name, known, tag
                        )))
                    }
                    Some(_) => {}
                    None => {
                        self.var_types.insert(v.full_id(), tag.to_owned());
                        self.changed = true;
                    }
                }
                Ok(())
            }
            Expr::Operation { args, .. } => {
                for arg in args {
                    self.assign(arg, tag)?;
                }
                Ok(())
            }
            Expr::Num { .. } => Ok(()),
            Expr::Const(name) => Err(Error::NotWellFormed(format!(
                "unresolved constant {}",
                name
            ))),
            fixed => match fixed.typ() {
                Some(own) if own != tag => Err(Error::Type(format!(
                    "{} is a {} but is used as {}",
                    fixed, own, tag
                ))),
                _ => Ok(()),
            },
        }
    }

    fn write_back(&self, rule: &mut Rule) -> Result<()> {
        let head_table = rule.head.table.clone();
        Self::apply_atom(&self.table_types, &self.var_types, &head_table, &mut rule.head)?;
        for atom in &mut rule.body {
            Self::apply_atom(&self.table_types, &self.var_types, &head_table, atom)?;
        }
        Ok(())
    }

    fn apply_atom(
        table_types: &HashMap<TableName, Vec<Option<TypeName>>>,
        var_types: &HashMap<FullId, TypeName>,
        head_table: &str,
        atom: &mut Atom,
    ) -> Result<()> {
        if primitives::is_comparison(&atom.table) {
            let tag = atom
                .args
                .iter()
                .find_map(|arg| Self::resolved_type(var_types, arg))
                .ok_or_else(|| {
                    Error::Type(format!(
                        "cannot infer the type of comparison {} in a rule for {}",
                        atom, head_table
                    ))
                })?;
            for arg in &mut atom.args {
                Self::apply_expr(arg, &tag);
            }
            return Ok(());
        }
        let cols = &table_types[&atom.table];
        for (arg, col) in atom.args.iter_mut().zip(cols) {
            let tag = col.as_ref().unwrap();
            Self::apply_expr(arg, tag);
        }
        Ok(())
    }

    fn resolved_type(var_types: &HashMap<FullId, TypeName>, expr: &Expr) -> Option<TypeName> {
        match expr {
            Expr::Variable(v) => v
                .typ
                .clone()
                .or_else(|| var_types.get(&v.full_id()).cloned()),
            Expr::Operation { args, .. } => {
                args.iter().find_map(|a| Self::resolved_type(var_types, a))
            }
            other => other.typ().map(str::to_owned),
        }
    }

    fn apply_expr(expr: &mut Expr, tag: &str) {
        expr.set_typ(tag);
        if let Expr::Operation { args, .. } = expr {
            for arg in args {
                Self::apply_expr(arg, tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_rules;

    fn schema(entries: &[(&str, &[&str])]) -> HashMap<TableName, Vec<TypeName>> {
        entries
            .iter()
            .map(|(name, tags)| {
                (
                    (*name).to_owned(),
                    tags.iter().map(|t| (*t).to_owned()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn types_flow_from_extensional_schema_to_heads() {
        let mut rules = parse_rules("t(X, Y) :- p(X), q(X, Y).").unwrap();
        let extensional = schema(&[("p", &["int"]), ("q", &["int", "string"])]);
        let registry = TypeRegistry::default();
        let tables = infer(&mut rules, &extensional, &registry).unwrap();
        assert_eq!(vec!["int", "string"], tables["t"].params);
        assert_eq!(Some("string"), rules[0].head.args[1].typ());
    }

    #[test]
    fn conflicting_uses_are_rejected() {
        let mut rules = parse_rules("t(X) :- p(X), q(X).").unwrap();
        let extensional = schema(&[("p", &["int"]), ("q", &["string"])]);
        let registry = TypeRegistry::default();
        assert!(matches!(
            infer(&mut rules, &extensional, &registry),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let mut rules = parse_rules("t(X) :- p(X, X).").unwrap();
        let extensional = schema(&[("p", &["int"])]);
        let registry = TypeRegistry::default();
        assert!(matches!(
            infer(&mut rules, &extensional, &registry),
            Err(Error::NotWellFormed(_))
        ));
    }

    #[test]
    fn bare_literal_columns_default_to_int() {
        let mut rules = parse_rules("s(3).").unwrap();
        let registry = TypeRegistry::default();
        let tables = infer(&mut rules, &HashMap::new(), &registry).unwrap();
        assert_eq!(vec!["int"], tables["s"].params);
    }

    #[test]
    fn comparisons_adopt_their_operands_type() {
        let mut rules = parse_rules("t(X) :- p(X, Y), X = Y & 1.").unwrap();
        let extensional = schema(&[("p", &["int4", "int4"])]);
        let registry = TypeRegistry::default();
        infer(&mut rules, &extensional, &registry).unwrap();
        assert_eq!(Some("int4"), rules[0].body[1].args[1].typ());
    }
}
