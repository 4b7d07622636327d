use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::iter::FromIterator;

use hashbag::HashBag;
use num_traits::ToPrimitive;

use crate::ast::{FullId, TableName, TypeName};
use crate::backend::{BvVal, RecordingBackend, Term};
use crate::error::Error;
use crate::origin::OriginType;
use crate::parser::{parse_program, parse_rules};
use crate::projection;
use crate::theory::{QueryAnswer, QueryCell, Theory};
use crate::types::Value;
use crate::unfold::{candidates, environs, to_solve, Site, UnfoldPlan, Unfolding};

const PROG0: &str = "
    t(X, 1) :- p(X).
    t(X, 2) :- p(X).
    s(X, 1) :- p(X).
    s(X, Y) :- q(X, Y).
";

const PROG1: &str = "
    t(X, Y) :- s(X1, X2, Y2), p(X1), q(X2, Y2), r(X2), r(Y2),
               X1 = X & X2, Y2 = Y & 15.
";

const PROG2: &str = "
    t(X, Y) :- p(X1), s(X2), X1 = X & X2.
    s(X) :- p(X).
    s(X) :- q(X).
";

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

fn fid(name: &str, rule: usize) -> FullId {
    (name.to_owned(), rule)
}

#[test]
fn to_solve_keeps_only_masked_merges() {
    let rules = parse_rules("t(X) :- p(X, Y), X = Y & 1, q(X), X < 10.").unwrap();
    let sites = to_solve(&rules[0]);
    assert_eq!(vec![(rules[0].body_variables(), 1)], sites);
}

#[test]
fn candidates_union_all_site_variables() {
    let (x, y, z) = (fid("X", 0), fid("Y", 0), fid("Z", 0));
    let sites: Vec<Site> = vec![
        (BTreeSet::from_iter([x.clone(), y.clone()]), 1),
        (BTreeSet::from_iter([x.clone(), z.clone()]), 2),
        (BTreeSet::from_iter([x.clone()]), 3),
    ];
    assert_eq!(BTreeSet::from_iter([x, y, z]), candidates(&sites));
}

#[test]
fn plan_flags_the_tables_feeding_unfolds() {
    let rules = parse_rules("t(X) :- p(X, Y), X = Y & 1.\ns(X) :- t(X), 2 = X & 2.").unwrap();
    let extensional = schema(&[("p", &["int", "int"])]);
    let plan = Unfolding::new(&rules, &extensional).plan().unwrap();
    assert_eq!(Some(&(2, true)), plan.tables.get("p"));
    assert_eq!(Some(&(1, false)), plan.tables.get("t"));
    assert_eq!(Some(&(1, false)), plan.tables.get("s"));
}

#[test]
fn initial_table_types_distinguish_literal_columns() {
    let rules = parse_rules(PROG0).unwrap();
    let extensional = schema(&[("q", &["int", "int"]), ("p", &["int"])]);
    let mut unfold = Unfolding::new(&rules, &extensional);
    unfold.initialize_types();
    assert_eq!(
        Some(&vec![OriginType::Bottom, OriginType::ground("t", 1)]),
        unfold.table_types.get("t")
    );
    let atom_t = &rules[0].head;
    assert_eq!(Some(&OriginType::Bottom), unfold.get_atom_type(atom_t, 0));
    assert_eq!(None, unfold.get_atom_type(atom_t, 3));
    let atom_z = crate::ast::Atom::new("z", vec![]);
    assert_eq!(None, unfold.get_atom_type(&atom_z, 0));
}

#[test]
fn variable_origins_carry_their_occurrence() {
    let rules = parse_rules(PROG0).unwrap();
    let extensional = schema(&[("q", &["int", "int"]), ("p", &["int"])]);
    let mut unfold = Unfolding::new(&rules, &extensional);
    unfold.initialize_types();
    unfold.type_variables();
    let origins: Vec<&OriginType> = [(1, "X"), (3, "X"), (3, "Y")]
        .iter()
        .map(|(rule, name)| &unfold.var_types[&fid(name, *rule)])
        .collect();
    let leaves: Vec<(&str, usize, &[String])> = origins
        .iter()
        .map(|origin| match origin {
            OriginType::Ground { table, pos, marks } => {
                (table.as_str(), *pos, marks.as_slice())
            }
            other => panic!("expected a ground origin, got {}", other),
        })
        .collect();
    assert_eq!("p", leaves[0].0);
    assert_eq!(("q", 0), (leaves[1].0, leaves[1].1));
    assert_eq!(("q", 1), (leaves[2].0, leaves[2].1));
    // Both q columns come from the same occurrence; p does not.
    assert_eq!(leaves[1].2, leaves[2].2);
    assert_ne!(leaves[0].2, leaves[1].2);
}

#[test]
fn intensional_columns_disjoin_across_defining_rules() {
    let rules = parse_rules(PROG0).unwrap();
    let extensional = schema(&[("q", &["int", "int"]), ("p", &["int"])]);
    let mut unfold = Unfolding::new(&rules, &extensional);
    unfold.initialize_types();
    unfold.type_variables();
    let tables = unfold.type_tables();
    assert!(matches!(tables["s"][0], OriginType::Disj(_)));
}

#[test]
fn inference_reaches_a_fixpoint() {
    let rules = parse_rules(PROG0).unwrap();
    let extensional = schema(&[("q", &["int", "int"]), ("p", &["int"])]);
    let mut unfold = Unfolding::new(&rules, &extensional);
    unfold.infer();
    assert!(matches!(unfold.table_types["s"][0], OriginType::Disj(_)));
}

#[test]
fn strategy_groups_same_occurrence_variables() {
    let rules = parse_rules(PROG1).unwrap();
    let extensional = schema(&[("q", &["int", "int"]), ("p", &["int"]), ("r", &["int"])]);
    let plan = Unfolding::new(&rules, &extensional).plan().unwrap();
    let shapes: Vec<(&str, &[usize])> = plan.plan[&0]
        .iter()
        .map(|(bundle, _)| {
            assert_eq!(1, bundle.len());
            (bundle[0].0.as_str(), bundle[0].1.as_slice())
        })
        .collect();
    assert_eq!(
        vec![("q", &[0, 1][..]), ("p", &[0][..])],
        shapes
    );
}

#[test]
fn strategy_falls_back_to_alternative_bundles() {
    let rules = parse_rules(PROG2).unwrap();
    let extensional = schema(&[("q", &["int"]), ("p", &["int"])]);
    let plan = Unfolding::new(&rules, &extensional).plan().unwrap();
    let items = &plan.plan[&0];
    assert_eq!(2, items.len());
    assert_eq!(vec![("p".to_owned(), vec![0])], items[0].0);
    assert_eq!(
        vec![("p".to_owned(), vec![0]), ("q".to_owned(), vec![0])],
        items[1].0
    );
    assert!(!plan.plan.contains_key(&1));
    assert!(!plan.plan.contains_key(&2));
}

#[test]
fn unresolved_polymorphism_is_reported_per_rule() {
    let rules =
        parse_rules("c(5).\nt(X) :- c(X), q(Y), X = Y & 1.").unwrap();
    let extensional = schema(&[("q", &["int"])]);
    let result = Unfolding::new(&rules, &extensional).plan();
    assert!(matches!(
        result,
        Err(Error::UnresolvedPolymorphism { ref var, .. }) if var == "X"
    ));
}

#[test]
fn environments_join_items_on_shared_variables() {
    let mut plan = UnfoldPlan::default();
    plan.plan.insert(
        0,
        vec![
            (
                vec![("p".to_owned(), vec![1, 0])],
                vec![fid("X", 0), fid("Y", 0)],
            ),
            (
                vec![("q".to_owned(), vec![0, 1])],
                vec![fid("Z", 0), fid("X", 0)],
            ),
        ],
    );
    let row = |a: i32, b: i32| vec![BvVal::new(a, 4), BvVal::new(b, 4)];
    plan.contents
        .insert("p".to_owned(), vec![row(3, 0), row(4, 1)]);
    plan.contents
        .insert("q".to_owned(), vec![row(5, 0), row(6, 1)]);

    let records = environs(&plan).unwrap();
    let mut got: Vec<Vec<(String, u32)>> = records[&0]
        .iter()
        .map(|env| {
            let mut pairs: Vec<(String, u32)> = env
                .iter()
                .map(|((name, _), value)| (name.clone(), value.bits.to_u32().unwrap()))
                .collect();
            pairs.sort();
            pairs
        })
        .collect();
    got.sort();
    let expected = vec![
        vec![("X".to_owned(), 0), ("Y".to_owned(), 3), ("Z".to_owned(), 5)],
        vec![("X".to_owned(), 1), ("Y".to_owned(), 4), ("Z".to_owned(), 6)],
    ];
    assert_eq!(expected, got);
}

#[test]
fn projection_intersects_ground_positions_across_rules() {
    let rules = parse_rules(PROG0).unwrap();
    let result = projection::compute(&rules, &BTreeSet::new());
    let mut expected: BTreeMap<TableName, BTreeSet<usize>> = BTreeMap::new();
    expected.insert("s".to_owned(), BTreeSet::new());
    expected.insert("t".to_owned(), BTreeSet::from_iter([1]));
    assert_eq!(expected, result.grounded);
}

#[test]
fn unfolded_rules_compile_once_per_environment() {
    let program = parse_program(
        "data p(a: int4, b: int4) = (3, 0), (4, 1);\nt(X) :- p(X, Y), X = Y & 1.",
    )
    .unwrap();
    let theory = Theory::new(program, RecordingBackend::new()).unwrap();
    let backend = theory.backend();
    assert_eq!(2, backend.facts.len());
    assert_eq!(2, backend.rules.len());
    // Every variable was bound by the plan, so nothing is quantified.
    for rule in &backend.rules {
        assert!(matches!(rule, Term::Implies(_, _)));
    }
}

#[test]
fn compilation_is_deterministic() {
    let code = "data p(x: int) = (1), (2);\nt(X) :- p(X).\nu(X) :- t(X), p(X).";
    let first = Theory::new(
        parse_program(code).unwrap(),
        RecordingBackend::new(),
    )
    .unwrap();
    let second = Theory::new(
        parse_program(code).unwrap(),
        RecordingBackend::new(),
    )
    .unwrap();
    assert_eq!(first.backend().rules, second.backend().rules);
    assert_eq!(first.backend().relations, second.backend().relations);
    assert_eq!(first.backend().facts, second.backend().facts);
}

fn pair_theory() -> Theory<RecordingBackend> {
    let program = parse_program("data pair(a: int, b: int) = (1, 2);").unwrap();
    Theory::new(program, RecordingBackend::new()).unwrap()
}

#[test]
fn masked_fragments_decode_to_value_mask_pairs() {
    let mut theory = pair_theory();
    theory.backend_mut().script_answer(Term::And(vec![
        Term::eq(
            Term::Extract {
                high: 3,
                low: 0,
                arg: Box::new(Term::BoundVar(0)),
            },
            Term::Lit(BvVal::new(5, 4)),
        ),
        Term::eq(Term::BoundVar(1), Term::Lit(BvVal::new(9, 32))),
    ]));
    let (names, answer) = theory.query("pair(X, Y)").unwrap();
    assert_eq!(vec!["X", "Y"], names);
    assert_eq!(
        QueryAnswer::Rows(vec![vec![
            QueryCell::Masked(Value::Int(5.into()), Value::Int(15.into())),
            QueryCell::Exact(Value::Int(9.into())),
        ]]),
        answer
    );
}

#[test]
fn ground_queries_answer_booleans() {
    let mut theory = pair_theory();
    theory.backend_mut().script_answer(Term::True);
    let (names, answer) = theory.query("pair(1, 2)").unwrap();
    assert!(names.is_empty());
    assert_eq!(QueryAnswer::Bool(true), answer);

    let mut theory = pair_theory();
    let (names, answer) = theory.query("pair(1, 2)").unwrap();
    assert!(names.is_empty());
    assert_eq!(QueryAnswer::Bool(false), answer);
}

#[test]
fn disjunctive_answers_decode_to_row_bags() {
    let mut theory = pair_theory();
    let row = |a: i32, b: i32| {
        Term::And(vec![
            Term::eq(Term::BoundVar(0), Term::Lit(BvVal::new(a, 32))),
            Term::eq(Term::BoundVar(1), Term::Lit(BvVal::new(b, 32))),
        ])
    };
    theory
        .backend_mut()
        .script_answer(Term::Or(vec![row(1, 2), row(3, 4)]));
    let (_, answer) = theory.query("pair(X, Y)").unwrap();
    let rows = match answer {
        QueryAnswer::Rows(rows) => rows,
        other => panic!("expected rows, got {:?}", other),
    };
    let got: HashBag<Vec<QueryCell>> = HashBag::from_iter(rows);
    let cell = |n: i32| QueryCell::Exact(Value::Int(n.into()));
    let expected: HashBag<Vec<QueryCell>> =
        HashBag::from_iter([vec![cell(1), cell(2)], vec![cell(3), cell(4)]]);
    assert_eq!(expected, got);
}

#[test]
fn query_arguments_resolve_named_constants() {
    let program =
        parse_program("const admin = 2;\ndata pair(a: int, b: int) = (1, 2);").unwrap();
    let mut theory = Theory::new(program, RecordingBackend::new()).unwrap();
    theory
        .backend_mut()
        .script_answer(Term::eq(Term::BoundVar(0), Term::Lit(BvVal::new(1, 32))));
    let (names, answer) = theory.query("pair(X, admin)").unwrap();
    assert_eq!(vec!["X"], names);
    assert_eq!(
        QueryAnswer::Rows(vec![vec![QueryCell::Exact(Value::Int(1.into()))]]),
        answer
    );
    let goal = theory.backend().queries.last().unwrap();
    assert!(!goal.to_string().contains("admin"));
}

#[test]
fn malformed_queries_are_fatal() {
    let mut theory = pair_theory();
    assert!(matches!(
        theory.query("pair(X)"),
        Err(Error::NotWellFormed(_))
    ));
    assert!(matches!(
        theory.query("ghost(X)"),
        Err(Error::NotWellFormed(_))
    ));
    assert!(matches!(
        theory.query("pair(\"nine\", Y)"),
        Err(Error::Type(_))
    ));
}

#[test]
fn queries_existentially_quantify_their_variables() {
    let mut theory = pair_theory();
    theory.backend_mut().script_answer(Term::False);
    theory.query("pair(X, 2)").unwrap();
    match theory.backend().queries.last() {
        Some(Term::Exists(vars, _)) => assert_eq!(1, vars.len()),
        other => panic!("expected an existential goal, got {:?}", other),
    }
}
