//! Per-type-tag adapters between source-level values and backend bit-vectors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::ast::Expr;
use crate::backend::{BvVal, Sort};
use crate::error::{Error, Result};

/// A value as the surface language sees it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Int(BigInt),
    Str(String),
    Bool(bool),
    Ip(Ipv4Addr),
}

impl Value {
    /// The value denoted by a literal expression, if the expression is one.
    pub fn from_literal(expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Num { value, .. } => Some(Value::Int(value.clone())),
            Expr::Str(s) => Some(Value::Str(s.clone())),
            Expr::Bool(b) => Some(Value::Bool(*b)),
            Expr::Ip(ip) => Some(Value::Ip(*ip)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Ip(ip) => write!(f, "{}", ip),
        }
    }
}

pub trait TypeAdapter {
    fn sort(&self) -> Sort;
    fn to_backend(&self, value: &Value) -> Result<BvVal>;
    fn from_backend(&self, value: &BvVal) -> Value;
}

struct IntType {
    width: u32,
}

impl TypeAdapter for IntType {
    fn sort(&self) -> Sort {
        Sort::BitVec(self.width)
    }

    fn to_backend(&self, value: &Value) -> Result<BvVal> {
        match value {
            Value::Int(n) => Ok(BvVal::new(n.clone(), self.width)),
            other => Err(Error::Type(format!(
                "expected an integer, got {}",
                other
            ))),
        }
    }

    fn from_backend(&self, value: &BvVal) -> Value {
        Value::Int(value.bits.clone())
    }
}

struct BoolType;

impl TypeAdapter for BoolType {
    fn sort(&self) -> Sort {
        Sort::BitVec(1)
    }

    fn to_backend(&self, value: &Value) -> Result<BvVal> {
        match value {
            Value::Bool(b) => Ok(BvVal::new(i32::from(*b), 1)),
            other => Err(Error::Type(format!("expected a boolean, got {}", other))),
        }
    }

    fn from_backend(&self, value: &BvVal) -> Value {
        Value::Bool(value.bits.to_u32() != Some(0))
    }
}

/// Strings are interned into fixed-width identifiers; the pool lives for the
/// whole theory so decoding maps identifiers back to the original text.
struct StringType {
    width: u32,
    pool: RefCell<Pool>,
}

#[derive(Default)]
struct Pool {
    ids: HashMap<String, u64>,
    names: Vec<String>,
}

impl StringType {
    fn new(width: u32) -> Self {
        StringType {
            width,
            pool: RefCell::new(Pool::default()),
        }
    }
}

impl TypeAdapter for StringType {
    fn sort(&self) -> Sort {
        Sort::BitVec(self.width)
    }

    fn to_backend(&self, value: &Value) -> Result<BvVal> {
        match value {
            Value::Str(s) => {
                let mut pool = self.pool.borrow_mut();
                let id = match pool.ids.get(s) {
                    Some(id) => *id,
                    None => {
                        let id = pool.names.len() as u64;
                        pool.ids.insert(s.clone(), id);
                        pool.names.push(s.clone());
                        id
                    }
                };
                Ok(BvVal::new(id, self.width))
            }
            other => Err(Error::Type(format!("expected a string, got {}", other))),
        }
    }

    fn from_backend(&self, value: &BvVal) -> Value {
        let pool = self.pool.borrow();
        match value.bits.to_usize().and_then(|id| pool.names.get(id)) {
            Some(name) => Value::Str(name.clone()),
            None => Value::Str(format!("str!{}", value.bits)),
        }
    }
}

struct IpType;

impl TypeAdapter for IpType {
    fn sort(&self) -> Sort {
        Sort::BitVec(32)
    }

    fn to_backend(&self, value: &Value) -> Result<BvVal> {
        match value {
            Value::Ip(ip) => Ok(BvVal::new(u32::from(*ip), 32)),
            other => Err(Error::Type(format!(
                "expected an ip address, got {}",
                other
            ))),
        }
    }

    fn from_backend(&self, value: &BvVal) -> Value {
        Value::Ip(Ipv4Addr::from(value.bits.to_u32().unwrap_or(0)))
    }
}

/// Maps type tags to their adapters. Unknown tags are a fatal type error.
pub struct TypeRegistry {
    types: HashMap<String, Box<dyn TypeAdapter>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut registry = TypeRegistry {
            types: HashMap::new(),
        };
        registry.register("int", Box::new(IntType { width: 32 }));
        registry.register("int4", Box::new(IntType { width: 4 }));
        registry.register("bool", Box::new(BoolType));
        registry.register("string", Box::new(StringType::new(16)));
        registry.register("ip_address", Box::new(IpType));
        registry
    }
}

impl TypeRegistry {
    pub fn register(&mut self, tag: impl Into<String>, adapter: Box<dyn TypeAdapter>) {
        self.types.insert(tag.into(), adapter);
    }

    pub fn get(&self, tag: &str) -> Result<&dyn TypeAdapter> {
        self.types
            .get(tag)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::Type(format!("unknown type {}", tag)))
    }

    pub fn sort(&self, tag: &str) -> Result<Sort> {
        Ok(self.get(tag)?.sort())
    }

    pub fn knows(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_interning_round_trips() {
        let registry = TypeRegistry::default();
        let adapter = registry.get("string").unwrap();
        let a = adapter.to_backend(&Value::Str("alpha".into())).unwrap();
        let b = adapter.to_backend(&Value::Str("beta".into())).unwrap();
        let a2 = adapter.to_backend(&Value::Str("alpha".into())).unwrap();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(Value::Str("beta".into()), adapter.from_backend(&b));
    }

    #[test]
    fn ints_truncate_to_declared_width() {
        let registry = TypeRegistry::default();
        let adapter = registry.get("int4").unwrap();
        let v = adapter.to_backend(&Value::Int(19.into())).unwrap();
        assert_eq!(BvVal::new(3, 4), v);
    }

    #[test]
    fn unknown_tag_is_a_type_error() {
        let registry = TypeRegistry::default();
        assert!(matches!(registry.get("int128"), Err(Error::Type(_))));
    }
}
