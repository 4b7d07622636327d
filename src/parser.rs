//! Surface grammar for theories and query atoms.

use pest::Parser as _;
use pest_derive::Parser;

use crate::ast::{
    assign_rule_ids, Atom, Expr, Program, Rule as AstRule, TableDecl, Variable,
};
use crate::error::{Error, Result};

#[derive(Parser)]
#[grammar = "gridlog.pest"]
struct Parser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

// The From<Pair> conversions below unwrap freely: the grammar guarantees the
// pair shapes, so a violation is a bug in the grammar, not bad input.

pub fn parse_program(code: &str) -> Result<Program> {
    let program = parse_root(Rule::program, code)?;
    let mut out = Program::default();
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::table_decl => out.tables.push(convert_table(pair)?),
            Rule::const_decl => {
                let mut pairs = pair.into_inner();
                let name = pairs.next().unwrap().as_str().to_owned();
                let value = convert_literal(pairs.next().unwrap())?;
                out.constants.push((name, value));
            }
            Rule::rule_decl => out.rules.push(convert_rule(pair)?),
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    assign_rule_ids(&mut out.rules);
    Ok(out)
}

/// Parses rules only; ids are assigned in source order.
pub fn parse_rules(code: &str) -> Result<Vec<AstRule>> {
    Ok(parse_program(code)?.rules)
}

/// Parses a single atom-shaped query.
pub fn parse_query(code: &str) -> Result<Atom> {
    let query = parse_root(Rule::query, code)?;
    let predicate = query.into_inner().next().unwrap();
    convert_predicate(predicate, false)
}

fn parse_root(rule: Rule, code: &str) -> Result<Pair<'_>> {
    Parser::parse(rule, code)
        .map_err(|e| Error::Parse(e.to_string()))?
        .next()
        .ok_or_else(|| Error::Parse("empty input".to_owned()))
}

fn convert_table(pair: Pair<'_>) -> Result<TableDecl> {
    let mut pairs = pair.into_inner();
    let name = pairs.next().unwrap().as_str().to_owned();
    let fields = pairs
        .next()
        .unwrap()
        .into_inner()
        .map(|field| {
            let mut parts = field.into_inner();
            let column = parts.next().unwrap().as_str().to_owned();
            let tag = parts.next().unwrap().as_str().to_owned();
            (column, tag)
        })
        .collect();
    let mut rows = Vec::new();
    if let Some(decl_rows) = pairs.next() {
        for tuple in decl_rows.into_inner() {
            rows.push(
                tuple
                    .into_inner()
                    .map(convert_literal)
                    .collect::<Result<Vec<_>>>()?,
            );
        }
    }
    Ok(TableDecl { name, fields, rows })
}

fn convert_rule(pair: Pair<'_>) -> Result<AstRule> {
    let mut pairs = pair.into_inner();
    let head = convert_predicate(pairs.next().unwrap(), false)?;
    let body = match pairs.next() {
        Some(body) => body
            .into_inner()
            .map(convert_body_atom)
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(AstRule { id: 0, head, body })
}

fn convert_body_atom(pair: Pair<'_>) -> Result<Atom> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::negated => convert_predicate(inner.into_inner().next().unwrap(), true),
        Rule::predicate => convert_predicate(inner, false),
        Rule::comparison => {
            let mut pairs = inner.into_inner();
            let lhs = convert_expr(pairs.next().unwrap())?;
            let op = pairs.next().unwrap().as_str().to_owned();
            let rhs = convert_expr(pairs.next().unwrap())?;
            Ok(Atom::new(op, vec![lhs, rhs]))
        }
        _ => unreachable!(),
    }
}

fn convert_predicate(pair: Pair<'_>, negated: bool) -> Result<Atom> {
    let mut pairs = pair.into_inner();
    let table = pairs.next().unwrap().as_str().to_owned();
    let mut args = Vec::new();
    let mut labels = Vec::new();
    let mut labeled = false;
    if let Some(arg_list) = pairs.next() {
        for arg in arg_list.into_inner() {
            let inner = arg.into_inner().next().unwrap();
            match inner.as_rule() {
                Rule::labeled_arg => {
                    let mut parts = inner.into_inner();
                    labels.push(parts.next().unwrap().as_str().to_owned());
                    labeled = true;
                    args.push(convert_expr(parts.next().unwrap())?);
                }
                Rule::expr => {
                    labels.push(String::new());
                    args.push(convert_expr(inner)?);
                }
                _ => unreachable!(),
            }
        }
    }
    Ok(Atom {
        table,
        args,
        negated,
        labels: labeled.then(|| labels),
    })
}

fn convert_expr(pair: Pair<'_>) -> Result<Expr> {
    let mut pairs = pair.into_inner();
    let mut expr = convert_operand(pairs.next().unwrap())?;
    while let Some(op) = pairs.next() {
        let rhs = convert_operand(pairs.next().unwrap())?;
        expr = Expr::Operation {
            op: op.as_str().to_owned(),
            args: vec![expr, rhs],
            typ: None,
        };
    }
    Ok(expr)
}

fn convert_operand(pair: Pair<'_>) -> Result<Expr> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::literal => convert_literal(inner),
        Rule::variable => {
            let mut parts = inner.into_inner();
            let name = parts.next().unwrap().as_str();
            Ok(Expr::Variable(match parts.next() {
                Some(tag) => Variable::typed(name, tag.as_str()),
                None => Variable::new(name),
            }))
        }
        Rule::const_ref => Ok(Expr::Const(inner.as_str().to_owned())),
        Rule::expr => convert_expr(inner),
        _ => unreachable!(),
    }
}

fn convert_literal(pair: Pair<'_>) -> Result<Expr> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::ip_lit => inner
            .as_str()
            .parse()
            .map(Expr::Ip)
            .map_err(|_| Error::Parse(format!("bad ip address {}", inner.as_str()))),
        Rule::num_lit => inner
            .as_str()
            .parse()
            .map(|value| Expr::Num { value, typ: None })
            .map_err(|_| Error::Parse(format!("bad number {}", inner.as_str()))),
        Rule::str_lit => Ok(Expr::Str(
            inner.into_inner().next().unwrap().as_str().to_owned(),
        )),
        Rule::bool_lit => Ok(Expr::Bool(inner.as_str() == "true")),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_with_comparisons_and_masks() {
        let rules = parse_rules("t(X) :- p(X, Y), X = Y & 1, q(X), X < 10.").unwrap();
        assert_eq!(1, rules.len());
        let rule = &rules[0];
        assert_eq!("t", rule.head_table());
        assert_eq!(4, rule.body.len());
        assert_eq!("=", rule.body[1].table);
        assert_eq!("<", rule.body[3].table);
    }

    #[test]
    fn parses_data_declarations() {
        let program = parse_program(
            r#"data port(id: int, owner: string) = (1, "alice"), (2, "bob");"#,
        )
        .unwrap();
        assert_eq!(1, program.tables.len());
        let table = &program.tables[0];
        assert_eq!("port", table.name);
        assert_eq!(
            vec![
                ("id".to_owned(), "int".to_owned()),
                ("owner".to_owned(), "string".to_owned())
            ],
            table.fields
        );
        assert_eq!(2, table.rows.len());
        assert_eq!(Expr::Str("bob".into()), table.rows[1][1]);
    }

    #[test]
    fn parses_negation_labels_and_typed_variables() {
        let rules =
            parse_rules("reach(X:int) :- edge(src = X, dst = Y), !blocked(Y).").unwrap();
        let rule = &rules[0];
        assert_eq!(
            Some(&vec!["src".to_owned(), "dst".to_owned()]),
            rule.body[0].labels.as_ref()
        );
        assert!(rule.body[1].negated);
        match &rule.head.args[0] {
            Expr::Variable(v) => assert_eq!(Some("int"), v.typ.as_deref()),
            other => panic!("expected a variable, got {}", other),
        }
    }

    #[test]
    fn variable_ids_are_scoped_per_rule() {
        let rules = parse_rules("t(X) :- p(X).\ns(X) :- q(X).").unwrap();
        let first = rules[0].head_variables();
        let second = rules[1].head_variables();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_rules("t(X :- p."), Err(Error::Parse(_))));
    }

    #[test]
    fn parses_queries_and_constants() {
        let atom = parse_query("port(X, Y)").unwrap();
        assert_eq!("port", atom.table);
        let program = parse_program("const admin = \"root\";\nt(X) :- p(X, admin).").unwrap();
        assert_eq!(1, program.constants.len());
        assert_eq!(Expr::Const("admin".into()), program.rules[0].body[0].args[1]);
    }
}
