use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use num_bigint::BigInt;

pub type TableName = String;
pub type TypeName = String;

/// Disambiguates same-named variables across rule scopes; every set or map
/// keyed on "a variable" uses this.
pub type FullId = (String, usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Owning rule id, assigned once by [`assign_rule_ids`].
    pub rule: usize,
    pub typ: Option<TypeName>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            rule: 0,
            typ: None,
        }
    }

    pub fn typed(name: impl Into<String>, typ: impl Into<TypeName>) -> Self {
        Variable {
            name: name.into(),
            rule: 0,
            typ: Some(typ.into()),
        }
    }

    pub fn full_id(&self) -> FullId {
        (self.name.clone(), self.rule)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Variable(Variable),
    Operation {
        op: String,
        args: Vec<Expr>,
        typ: Option<TypeName>,
    },
    Num {
        value: BigInt,
        typ: Option<TypeName>,
    },
    Str(String),
    Bool(bool),
    Ip(Ipv4Addr),
    /// Named placeholder substituted from the constant registry before
    /// compilation.
    Const(String),
}

impl Expr {
    pub fn num(value: impl Into<BigInt>) -> Self {
        Expr::Num {
            value: value.into(),
            typ: None,
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(Variable::new(name))
    }

    /// Free variables of the expression, by full id.
    pub fn variables(&self, out: &mut BTreeSet<FullId>) {
        match self {
            Expr::Variable(v) => {
                out.insert(v.full_id());
            }
            Expr::Operation { args, .. } => {
                for arg in args {
                    arg.variables(out);
                }
            }
            _ => {}
        }
    }

    /// Declared or inferred type tag, when known.
    pub fn typ(&self) -> Option<&str> {
        match self {
            Expr::Variable(v) => v.typ.as_deref(),
            Expr::Operation { typ, .. } => typ.as_deref(),
            Expr::Num { typ, .. } => typ.as_deref(),
            Expr::Str(_) => Some("string"),
            Expr::Bool(_) => Some("bool"),
            Expr::Ip(_) => Some("ip_address"),
            Expr::Const(_) => None,
        }
    }

    pub fn set_typ(&mut self, tag: &str) {
        match self {
            Expr::Variable(v) => v.typ = Some(tag.to_owned()),
            Expr::Operation { typ, .. } => *typ = Some(tag.to_owned()),
            Expr::Num { typ, .. } => *typ = Some(tag.to_owned()),
            _ => {}
        }
    }

    fn visit_variables_mut(&mut self, f: &mut impl FnMut(&mut Variable)) {
        match self {
            Expr::Variable(v) => f(v),
            Expr::Operation { args, .. } => {
                for arg in args {
                    arg.visit_variables_mut(f);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Variable(v) => match &v.typ {
                Some(t) => write!(f, "{}:{}", v.name, t),
                None => write!(f, "{}", v.name),
            },
            Expr::Operation { op, args, .. } => {
                let mut sep = "";
                for arg in args {
                    write!(f, "{}{}", sep, arg)?;
                    sep = op;
                }
                Ok(())
            }
            Expr::Num { value, .. } => write!(f, "{}", value),
            Expr::Str(s) => write!(f, "{:?}", s),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Ip(ip) => write!(f, "{}", ip),
            Expr::Const(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom {
    pub table: TableName,
    pub args: Vec<Expr>,
    pub negated: bool,
    /// Named-argument display only, no semantic effect.
    pub labels: Option<Vec<String>>,
}

impl Atom {
    pub fn new(table: impl Into<TableName>, args: Vec<Expr>) -> Self {
        Atom {
            table: table.into(),
            args,
            negated: false,
            labels: None,
        }
    }

    pub fn variables(&self) -> BTreeSet<FullId> {
        let mut out = BTreeSet::new();
        for arg in &self.args {
            arg.variables(&mut out);
        }
        out
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }
        write!(f, "{}(", self.table)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let label = self
                .labels
                .as_ref()
                .and_then(|l| l.get(i))
                .filter(|l| !l.is_empty());
            if let Some(label) = label {
                write!(f, "{} = ", label)?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    /// Stable per syntactic rule, assigned by [`assign_rule_ids`].
    pub id: usize,
    pub head: Atom,
    pub body: Vec<Atom>,
}

impl Rule {
    pub fn head_table(&self) -> &str {
        &self.head.table
    }

    pub fn head_variables(&self) -> BTreeSet<FullId> {
        self.head.variables()
    }

    pub fn body_variables(&self) -> BTreeSet<FullId> {
        self.body.iter().flat_map(|atom| atom.variables()).collect()
    }

    pub fn body_tables(&self) -> BTreeSet<&str> {
        self.body.iter().map(|atom| atom.table.as_str()).collect()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for (i, atom) in self.body.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { " :-" } else { "," }, atom)?;
        }
        write!(f, ".")
    }
}

/// A table with a name and the type tags of its columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedTable {
    pub name: TableName,
    pub params: Vec<TypeName>,
}

/// Extensional table declaration: field names, type tags and inline rows.
#[derive(Clone, Debug)]
pub struct TableDecl {
    pub name: TableName,
    pub fields: Vec<(String, TypeName)>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub tables: Vec<TableDecl>,
    pub constants: Vec<(String, Expr)>,
    pub rules: Vec<Rule>,
}

/// Assigns each rule its stable id and stamps that id into every variable of
/// the rule, fixing the variables' full ids. Done once, before any analysis.
pub fn assign_rule_ids(rules: &mut [Rule]) {
    for (id, rule) in rules.iter_mut().enumerate() {
        rule.id = id;
        let mut stamp = |v: &mut Variable| v.rule = id;
        for arg in &mut rule.head.args {
            arg.visit_variables_mut(&mut stamp);
        }
        for atom in &mut rule.body {
            for arg in &mut atom.args {
                arg.visit_variables_mut(&mut stamp);
            }
        }
    }
}
