//! Specializes polymorphic programs: infers, for every table column and body
//! variable, which extensional relation/column its value originates from, and
//! plans the per-rule instantiations needed before the program becomes
//! monomorphic enough for the backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::ast::{Atom, Expr, FullId, Rule, TableName, TypeName};
use crate::backend::BvVal;
use crate::error::{Error, Result};
use crate::origin::{reduce_conj, reduce_disj, Mark, OriginType};
use crate::primitives;

/// One extensional selector: a table and the column positions projected out
/// of each of its rows.
pub type Selector = (TableName, Vec<usize>);

/// Alternative selectors, any one of which may populate the same variables.
pub type SelectorBundle = Vec<Selector>;

/// A plan item binds `variables` positionally from any selector of its
/// bundle; items of one rule are joined on their shared variables.
pub type PlanItem = (SelectorBundle, Vec<FullId>);

#[derive(Clone, Debug, Default)]
pub struct UnfoldPlan {
    pub plan: BTreeMap<usize, Vec<PlanItem>>,
    /// Per table: arity and whether its retrieved content must be captured.
    pub tables: HashMap<TableName, (usize, bool)>,
    /// Rows captured during data retrieval for the tables flagged above.
    pub contents: HashMap<TableName, Vec<Vec<BvVal>>>,
}

impl UnfoldPlan {
    /// Variables the plan resolves to concrete constant bindings.
    pub fn unfolded_variables(&self) -> BTreeSet<FullId> {
        self.plan
            .values()
            .flatten()
            .flat_map(|(_, vars)| vars.iter().cloned())
            .collect()
    }
}

/// Variable-to-value bindings for one compiled instance of a rule.
pub type Environment = HashMap<FullId, BvVal>;

/// A candidate resolution site: the rule's body variables paired with the
/// body position of the qualifying masked-merge equality.
pub type Site = (BTreeSet<FullId>, usize);

/// Scans a rule body for masked-merge equalities (`X = Y & M`), the only
/// constraints the planner can resolve variables through.
pub fn to_solve(rule: &Rule) -> Vec<Site> {
    rule.body
        .iter()
        .enumerate()
        .filter(|(_, atom)| {
            atom.table == "="
                && !atom.negated
                && atom.args.len() == 2
                && atom.args.iter().any(is_masked_merge)
        })
        .map(|(pos, _)| (rule.body_variables(), pos))
        .collect()
}

fn is_masked_merge(expr: &Expr) -> bool {
    matches!(expr, Expr::Operation { op, .. } if op == primitives::MASK_OP)
}

/// All variables mentioned by any resolution site; the plan must account for
/// each of them or the rule is rejected.
pub fn candidates(sites: &[Site]) -> BTreeSet<FullId> {
    sites
        .iter()
        .flat_map(|(vars, _)| vars.iter().cloned())
        .collect()
}

pub struct Unfolding<'a> {
    rules: &'a [Rule],
    extensional: &'a HashMap<TableName, Vec<TypeName>>,
    pub table_types: HashMap<TableName, Vec<OriginType>>,
    pub var_types: HashMap<FullId, OriginType>,
}

impl<'a> Unfolding<'a> {
    pub fn new(rules: &'a [Rule], extensional: &'a HashMap<TableName, Vec<TypeName>>) -> Self {
        Unfolding {
            rules,
            extensional,
            table_types: HashMap::new(),
            var_types: HashMap::new(),
        }
    }

    /// Mark identifying one body-atom occurrence; the same occurrence for two
    /// columns means their values come from the same row.
    fn occurrence(rule: &Rule, atom_pos: usize) -> Mark {
        format!("{}:{}", rule.id, atom_pos)
    }

    fn defining_rules(&self, table: &str) -> impl Iterator<Item = &'a Rule> {
        let rules = self.rules;
        let table = table.to_owned();
        rules.iter().filter(move |r| r.head.table == table)
    }

    fn intensional_tables(&self) -> BTreeSet<&'a str> {
        self.rules.iter().map(|r| r.head_table()).collect()
    }

    /// Seeds the per-table column types: extensional columns are ground at
    /// themselves; an intensional column is ground (at its own table) only
    /// when every defining rule puts a non-variable there.
    pub fn initialize_types(&mut self) {
        for (name, params) in self.extensional {
            self.table_types.insert(
                name.clone(),
                (0..params.len())
                    .map(|i| OriginType::ground(name.clone(), i))
                    .collect(),
            );
        }
        for table in self.intensional_tables() {
            let arity = match self.defining_rules(table).next() {
                Some(rule) => rule.head.args.len(),
                None => continue,
            };
            let types = (0..arity)
                .map(|i| {
                    let always_literal = self
                        .defining_rules(table)
                        .all(|r| !matches!(r.head.args.get(i), Some(Expr::Variable(_)) | None));
                    if always_literal {
                        OriginType::ground(table, i)
                    } else {
                        OriginType::Bottom
                    }
                })
                .collect();
            self.table_types.insert(table.to_owned(), types);
        }
    }

    pub fn get_atom_type(&self, atom: &Atom, pos: usize) -> Option<&OriginType> {
        self.table_types.get(&atom.table)?.get(pos)
    }

    /// One pass of origin inference for body variables, against the current
    /// table types. Negated atoms and comparisons supply no provenance.
    pub fn type_variables(&mut self) {
        self.var_types.clear();
        for rule in self.rules {
            for (pos, atom) in rule.body.iter().enumerate() {
                if atom.negated || primitives::is_comparison(&atom.table) {
                    continue;
                }
                let mark = Self::occurrence(rule, pos);
                for (i, arg) in atom.args.iter().enumerate() {
                    let var = match arg {
                        Expr::Variable(v) => v,
                        _ => continue,
                    };
                    let contribution = match self.get_atom_type(atom, i) {
                        Some(t) => t.wrap(&mark),
                        None => continue,
                    };
                    let merged = match self.var_types.remove(&var.full_id()) {
                        Some(existing) => reduce_conj([existing, contribution]),
                        None => contribution,
                    };
                    self.var_types.insert(var.full_id(), merged);
                }
            }
            // Plain equality between two variables shares their origins.
            // Masked merges are deliberately excluded: they constrain bit
            // ranges, not whole values.
            for atom in &rule.body {
                if atom.table != "=" || atom.args.len() != 2 {
                    continue;
                }
                if let (Expr::Variable(a), Expr::Variable(b)) = (&atom.args[0], &atom.args[1]) {
                    let ta = self.var_types.get(&a.full_id()).cloned();
                    let tb = self.var_types.get(&b.full_id()).cloned();
                    let merged = reduce_conj(ta.into_iter().chain(tb));
                    if merged != OriginType::Bottom {
                        self.var_types.insert(a.full_id(), merged.clone());
                        self.var_types.insert(b.full_id(), merged);
                    }
                }
            }
        }
    }

    /// Recomputes intensional column types from the head arguments of the
    /// defining rules: disjunction across rules, the variables' inferred
    /// origins within one rule.
    pub fn type_tables(&mut self) -> HashMap<TableName, Vec<OriginType>> {
        let mut out = HashMap::new();
        for table in self.intensional_tables() {
            let arity = match self.defining_rules(table).next() {
                Some(rule) => rule.head.args.len(),
                None => continue,
            };
            let types = (0..arity)
                .map(|i| {
                    reduce_disj(self.defining_rules(table).map(|r| match r.head.args.get(i) {
                        Some(Expr::Variable(v)) => self
                            .var_types
                            .get(&v.full_id())
                            .cloned()
                            .unwrap_or(OriginType::Bottom),
                        Some(Expr::Operation { .. }) => OriginType::Top,
                        Some(_) => OriginType::ground(table, i),
                        None => OriginType::Bottom,
                    }))
                })
                .collect();
            out.insert(table.to_owned(), types);
        }
        out
    }

    /// Runs inference to a fixpoint (bounded by the table count, so recursive
    /// programs terminate with approximate chains instead of looping).
    pub fn infer(&mut self) {
        self.initialize_types();
        let rounds = self.table_types.len() + 1;
        for _ in 0..rounds {
            self.type_variables();
            let tables = self.type_tables();
            let changed = tables
                .iter()
                .any(|(name, types)| self.table_types.get(name) != Some(types));
            self.table_types.extend(tables);
            if !changed {
                break;
            }
        }
        for (var, typ) in &self.var_types {
            debug!("origin of {}@{}: {}", var.0, var.1, typ);
        }
    }

    /// Ground alternatives usable to bind one variable, simplest first. Only
    /// extensional sources qualify; constant-origin leaves are not rows.
    fn ground_alternatives(&self, typ: &OriginType) -> Vec<Vec<GroundLeaf>> {
        match typ {
            OriginType::Ground { table, pos, marks } if self.extensional.contains_key(table) => {
                vec![vec![GroundLeaf {
                    table: table.clone(),
                    pos: *pos,
                    marks: marks.clone(),
                }]]
            }
            OriginType::Conj(members) => {
                let mut singles = Vec::new();
                let mut alt_sets = Vec::new();
                for member in members {
                    for alt in self.ground_alternatives(member) {
                        if alt.len() == 1 {
                            singles.push(alt);
                        } else {
                            alt_sets.push(alt);
                        }
                    }
                }
                singles.extend(alt_sets);
                singles
            }
            OriginType::Disj(members) => {
                let leaves: Vec<GroundLeaf> = members
                    .iter()
                    .filter_map(|m| {
                        self.ground_alternatives(m)
                            .into_iter()
                            .next()
                            .and_then(|alt| alt.into_iter().next())
                    })
                    .collect();
                if leaves.is_empty() {
                    vec![]
                } else {
                    vec![leaves]
                }
            }
            _ => vec![],
        }
    }

    /// Per-rule strategy search: picks, for every variable a resolution site
    /// needs bound, the extensional source(s) supplying it, grouping
    /// variables served by the same atom occurrence into one selector.
    pub fn rule_strategy(&self, rule: &Rule) -> Result<Vec<PlanItem>> {
        let sites = to_solve(rule);
        if sites.is_empty() {
            return Ok(Vec::new());
        }

        let mut needed: Vec<FullId> = Vec::new();
        for (_, pos) in &sites {
            let atom = &rule.body[*pos];
            let mut side_vars = Vec::new();
            let mut free_sides = 0;
            for arg in &atom.args {
                let mut vars = BTreeSet::new();
                arg.variables(&mut vars);
                if vars.iter().any(|v| !self.is_determined(v)) {
                    free_sides += 1;
                }
                side_vars.extend(vars);
            }
            // The single-variable-remaining heuristic: with free variables on
            // both sides no binding order makes the site computable.
            if free_sides > 1 {
                continue;
            }
            for var in side_vars {
                if self.is_determined(&var) && !needed.contains(&var) {
                    needed.push(var);
                }
            }
        }

        let mut remaining = needed;
        let mut items: Vec<PlanItem> = Vec::new();
        while !remaining.is_empty() {
            // Group single-source candidates by atom occurrence and take the
            // one covering the most variables still unbound.
            let mut groups: Vec<((TableName, Vec<Mark>), Vec<(FullId, usize)>)> = Vec::new();
            for var in &remaining {
                let typ = &self.var_types[var];
                for alt in self.ground_alternatives(typ) {
                    if let [leaf] = alt.as_slice() {
                        let key = (leaf.table.clone(), leaf.marks.clone());
                        let idx = match groups.iter().position(|(k, _)| *k == key) {
                            Some(idx) => idx,
                            None => {
                                groups.push((key, Vec::new()));
                                groups.len() - 1
                            }
                        };
                        let group = &mut groups[idx].1;
                        if !group.iter().any(|(v, _)| v == var) {
                            group.push((var.clone(), leaf.pos));
                        }
                    }
                }
            }
            let best = groups
                .into_iter()
                .min_by_key(|(_, members)| std::cmp::Reverse(members.len()));
            if let Some((key, members)) = best {
                let (vars, positions): (Vec<FullId>, Vec<usize>) = members.into_iter().unzip();
                remaining.retain(|v| !vars.contains(v));
                items.push((vec![(key.0, positions)], vars));
                continue;
            }
            // No single source left: fall back to the first variable's
            // alternative set, one selector per alternative.
            let var = remaining.remove(0);
            let typ = &self.var_types[&var];
            let alt_set = self
                .ground_alternatives(typ)
                .into_iter()
                .find(|alt| !alt.is_empty());
            match alt_set {
                Some(leaves) => {
                    let bundle = leaves
                        .into_iter()
                        .map(|leaf| (leaf.table, vec![leaf.pos]))
                        .collect();
                    items.push((bundle, vec![var]));
                }
                None => {
                    return Err(Error::UnresolvedPolymorphism {
                        var: var.0,
                        rule: rule.to_string(),
                    })
                }
            }
        }
        Ok(items)
    }

    fn is_determined(&self, var: &FullId) -> bool {
        !matches!(
            self.var_types.get(var),
            None | Some(OriginType::Bottom) | Some(OriginType::Top)
        )
    }

    /// Builds the full plan: strategies per rule plus the table metadata the
    /// retrieval phase needs.
    pub fn plan(&mut self) -> Result<UnfoldPlan> {
        for rule in self.rules {
            if self.extensional.contains_key(rule.head_table()) {
                return Err(Error::NotWellFormed(format!(
                    "extensional table {} redefined by rule: {}",
                    rule.head_table(),
                    rule
                )));
            }
        }
        self.infer();
        let mut plan = BTreeMap::new();
        for rule in self.rules {
            let items = self.rule_strategy(rule)?;
            if !items.is_empty() {
                plan.insert(rule.id, items);
            }
        }

        let selected: BTreeSet<&str> = plan
            .values()
            .flatten()
            .flat_map(|(bundle, _)| bundle.iter().map(|(table, _)| table.as_str()))
            .collect();
        let mut tables = HashMap::new();
        for (name, params) in self.extensional {
            tables.insert(name.clone(), (params.len(), selected.contains(name.as_str())));
        }
        for rule in self.rules {
            tables
                .entry(rule.head.table.clone())
                .or_insert((rule.head.args.len(), false));
        }

        for (id, items) in &plan {
            debug!("unfold plan for rule {}: {:?}", id, items);
        }
        Ok(UnfoldPlan {
            plan,
            tables,
            contents: HashMap::new(),
        })
    }
}

struct GroundLeaf {
    table: TableName,
    pos: usize,
    marks: Vec<Mark>,
}

/// Expands the plan into concrete environments, one per consistent way of
/// drawing rows from the captured contents: selectors inside a bundle union
/// their rows, items of one rule join on shared variables.
pub fn environs(plan: &UnfoldPlan) -> Result<HashMap<usize, Vec<Environment>>> {
    let mut out = HashMap::new();
    for (rule_id, items) in &plan.plan {
        let mut envs: Vec<Environment> = vec![Environment::new()];
        for (bundle, vars) in items {
            let mut partials: Vec<Environment> = Vec::new();
            for (table, positions) in bundle {
                let rows = match plan.contents.get(table) {
                    Some(rows) => rows,
                    None => continue,
                };
                for row in rows {
                    let mut env = Environment::new();
                    for (var, pos) in vars.iter().zip(positions) {
                        let value = row.get(*pos).ok_or_else(|| {
                            Error::NotWellFormed(format!(
                                "row of {} too short for column {}",
                                table, pos
                            ))
                        })?;
                        env.insert(var.clone(), value.clone());
                    }
                    partials.push(env);
                }
            }
            envs = join(envs, &partials);
        }
        out.insert(*rule_id, envs);
    }
    Ok(out)
}

fn join(envs: Vec<Environment>, partials: &[Environment]) -> Vec<Environment> {
    let mut out = Vec::new();
    for env in &envs {
        for partial in partials {
            if partial
                .iter()
                .all(|(var, value)| env.get(var).map_or(true, |known| known == value))
            {
                let mut merged = env.clone();
                merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
                out.push(merged);
            }
        }
    }
    out
}
