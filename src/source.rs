//! Retrieval of extensional rows from an external data source.

use std::collections::HashMap;

use crate::ast::{TableDecl, TableName};
use crate::error::{Error, Result};
use crate::types::Value;

/// Receives one retrieved row at a time, values in requested-field order.
pub type RowSink<'a> = dyn FnMut(Vec<Value>) -> Result<()> + 'a;

/// Observes rows before they are forwarded to the sink; installed when the
/// caller needs to capture raw content alongside the normal delivery.
pub type RowExtract<'a> = dyn FnMut(&[Value]) -> Result<()> + 'a;

pub trait DataSource {
    /// Calls `sink` once per row of `name`, projecting the columns named in
    /// `fields`, in that order. `extract` sees every row first.
    fn retrieve_table(
        &mut self,
        name: &str,
        fields: &[String],
        sink: &mut RowSink<'_>,
        extract: Option<&mut RowExtract<'_>>,
    ) -> Result<()>;
}

/// Rows declared inline with the program.
pub struct StaticSource {
    tables: HashMap<TableName, (Vec<String>, Vec<Vec<Value>>)>,
}

impl StaticSource {
    pub fn new(decls: &[TableDecl]) -> Result<Self> {
        let mut tables = HashMap::new();
        for decl in decls {
            let fields: Vec<String> = decl.fields.iter().map(|(name, _)| name.clone()).collect();
            let mut rows = Vec::new();
            for row in &decl.rows {
                if row.len() != fields.len() {
                    return Err(Error::NotWellFormed(format!(
                        "row of {} has {} values for {} fields",
                        decl.name,
                        row.len(),
                        fields.len()
                    )));
                }
                rows.push(
                    row.iter()
                        .map(|expr| {
                            Value::from_literal(expr).ok_or_else(|| {
                                Error::NotWellFormed(format!(
                                    "non-literal value {} in data for {}",
                                    expr, decl.name
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            tables.insert(decl.name.clone(), (fields, rows));
        }
        Ok(StaticSource { tables })
    }
}

impl DataSource for StaticSource {
    fn retrieve_table(
        &mut self,
        name: &str,
        fields: &[String],
        sink: &mut RowSink<'_>,
        mut extract: Option<&mut RowExtract<'_>>,
    ) -> Result<()> {
        let (declared, rows) = self
            .tables
            .get(name)
            .ok_or_else(|| Error::NotWellFormed(format!("no data for table {}", name)))?;
        let positions = fields
            .iter()
            .map(|field| {
                declared.iter().position(|f| f == field).ok_or_else(|| {
                    Error::NotWellFormed(format!("table {} has no field {}", name, field))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for row in rows {
            let projected: Vec<Value> = positions.iter().map(|i| row[*i].clone()).collect();
            if let Some(extract) = extract.as_deref_mut() {
                extract(&projected)?;
            }
            sink(projected)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    #[test]
    fn static_rows_are_projected_in_field_order() {
        let program = parse_program(
            r#"data port(id: int, owner: string) = (1, "alice"), (2, "bob");"#,
        )
        .unwrap();
        let mut source = StaticSource::new(&program.tables).unwrap();
        let mut seen = Vec::new();
        source
            .retrieve_table(
                "port",
                &["owner".to_owned(), "id".to_owned()],
                &mut |row| {
                    seen.push(row);
                    Ok(())
                },
                None,
            )
            .unwrap();
        assert_eq!(
            vec![
                vec![Value::Str("alice".into()), Value::Int(1.into())],
                vec![Value::Str("bob".into()), Value::Int(2.into())],
            ],
            seen
        );
    }

    #[test]
    fn extract_sees_every_row_before_the_sink() {
        let program =
            parse_program("data flag(up: bool) = (true), (false);").unwrap();
        let mut source = StaticSource::new(&program.tables).unwrap();
        let mut captured = Vec::new();
        let mut extract = |row: &[Value]| {
            captured.push(row.to_vec());
            Ok(())
        };
        source
            .retrieve_table(
                "flag",
                &["up".to_owned()],
                &mut |_| Ok(()),
                Some(&mut extract),
            )
            .unwrap();
        assert_eq!(2, captured.len());
    }

    #[test]
    fn unknown_table_is_rejected() {
        let mut source = StaticSource::new(&[]).unwrap();
        let result = source.retrieve_table("ghost", &[], &mut |_| Ok(()), None);
        assert!(matches!(result, Err(Error::NotWellFormed(_))));
    }
}
