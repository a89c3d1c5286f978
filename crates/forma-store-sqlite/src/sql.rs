//! Statement text for the entity tables.
//!
//! Identifiers are always quoted; every operand is a positional parameter.

use forma_core::{
  compile::PRIMARY_KEY,
  ddl::quote,
  query::{Condition, FilterOp, SelectSpec},
  row::{Assignments, RowUpdate},
  value::Value,
};
use rusqlite::types::Value as SqlValue;

use crate::encode::to_sql;

/// SQL text with its positional parameters.
#[derive(Debug)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

fn clamp(n: u64) -> SqlValue { SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX)) }

fn escape_like(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    if matches!(ch, '\\' | '%' | '_') {
      out.push('\\');
    }
    out.push(ch);
  }
  out
}

fn text_operand(value: &Value) -> String {
  match value {
    Value::Text(s) => s.clone(),
    other => match other.to_json() {
      serde_json::Value::String(s) => s,
      json => json.to_string(),
    },
  }
}

fn condition(c: &Condition, params: &mut Vec<SqlValue>) -> String {
  let col = quote(&c.column);
  let binary = |params: &mut Vec<SqlValue>, op: &str| {
    params.push(to_sql(&c.value));
    format!("{col} {op} ?")
  };
  match c.op {
    FilterOp::IsNull => format!("{col} IS NULL"),
    FilterOp::IsNotNull => format!("{col} IS NOT NULL"),
    FilterOp::Eq if c.value.is_null() => format!("{col} IS NULL"),
    FilterOp::Ne if c.value.is_null() => format!("{col} IS NOT NULL"),
    FilterOp::Eq => binary(params, "="),
    // NULL cells differ from any value.
    FilterOp::Ne => {
      params.push(to_sql(&c.value));
      format!("({col} <> ? OR {col} IS NULL)")
    }
    FilterOp::Gt => binary(params, ">"),
    FilterOp::Gte => binary(params, ">="),
    FilterOp::Lt => binary(params, "<"),
    FilterOp::Lte => binary(params, "<="),
    FilterOp::Contains => {
      params.push(SqlValue::Text(format!("%{}%", escape_like(&text_operand(&c.value)))));
      format!("{col} LIKE ? ESCAPE '\\'")
    }
    FilterOp::StartsWith => {
      params.push(SqlValue::Text(format!("{}%", escape_like(&text_operand(&c.value)))));
      format!("{col} LIKE ? ESCAPE '\\'")
    }
  }
}

/// ` WHERE a AND b`, or nothing.
fn where_clause(conditions: &[Condition], params: &mut Vec<SqlValue>) -> String {
  if conditions.is_empty() {
    return String::new();
  }
  let parts: Vec<String> = conditions.iter().map(|c| condition(c, params)).collect();
  format!(" WHERE {}", parts.join(" AND "))
}

pub fn select(table: &str, spec: &SelectSpec) -> Statement {
  let mut params = Vec::new();
  let columns = match &spec.columns {
    Some(columns) => columns
      .iter()
      .map(|c| quote(&c.name))
      .collect::<Vec<_>>()
      .join(", "),
    None => "*".to_owned(),
  };
  let mut sql = format!("SELECT {columns} FROM {}", quote(table));
  sql.push_str(&where_clause(&spec.conditions, &mut params));
  if let Some(order) = &spec.order_by {
    sql.push_str(&format!(
      " ORDER BY {} {}",
      quote(&order.column),
      if order.descending { "DESC" } else { "ASC" }
    ));
  }
  sql.push_str(" LIMIT ? OFFSET ?");
  params.push(clamp(spec.take));
  params.push(clamp(spec.skip));
  Statement { sql, params }
}

pub fn count(table: &str, conditions: &[Condition]) -> Statement {
  let mut params = Vec::new();
  let mut sql = format!("SELECT COUNT(*) FROM {}", quote(table));
  sql.push_str(&where_clause(conditions, &mut params));
  Statement { sql, params }
}

pub fn insert(table: &str, values: &Assignments) -> Statement {
  if values.is_empty() {
    return Statement {
      sql:    format!("INSERT INTO {} DEFAULT VALUES", quote(table)),
      params: Vec::new(),
    };
  }
  let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
  let marks = vec!["?"; values.len()].join(", ");
  Statement {
    sql:    format!("INSERT INTO {} ({}) VALUES ({marks})", quote(table), columns.join(", ")),
    params: values.iter().map(|(_, v)| to_sql(v)).collect(),
  }
}

/// `UPDATE` guarded by id, the optional version check and any extra
/// conditions. A version guard also bumps the version column.
pub fn update(table: &str, update: &RowUpdate) -> Statement {
  let mut params = Vec::new();
  let mut sets: Vec<String> = update
    .values
    .iter()
    .map(|(c, v)| {
      params.push(to_sql(v));
      format!("{} = ?", quote(c))
    })
    .collect();
  if let Some(guard) = &update.guard {
    let col = quote(&guard.column);
    sets.push(format!("{col} = {col} + 1"));
  }
  if sets.is_empty() {
    let id = quote(PRIMARY_KEY);
    sets.push(format!("{id} = {id}"));
  }

  let mut conditions = vec![Condition::eq(PRIMARY_KEY, Value::Integer(update.id))];
  if let Some(guard) = &update.guard {
    conditions.push(Condition::eq(&guard.column, Value::Integer(guard.expected)));
  }
  conditions.extend(update.conditions.iter().cloned());

  let mut sql = format!("UPDATE {} SET {}", quote(table), sets.join(", "));
  sql.push_str(&where_clause(&conditions, &mut params));
  Statement { sql, params }
}

#[cfg(test)]
mod tests {
  use forma_core::{
    query::OrderBy,
    row::VersionGuard,
  };

  use super::*;

  #[test]
  fn update_bumps_the_guarded_version() {
    let stmt = update("Products", &RowUpdate {
      id:         7,
      values:     vec![("Name".into(), Value::Text("Widget".into()))],
      guard:      Some(VersionGuard {
        column:   "Version".into(),
        expected: 3,
      }),
      conditions: vec![Condition::eq("IsDeleted", Value::Bool(false))],
      children:   Vec::new(),
    });
    assert_eq!(
      stmt.sql,
      "UPDATE \"Products\" SET \"Name\" = ?, \"Version\" = \"Version\" + 1 \
       WHERE \"Id\" = ? AND \"Version\" = ? AND \"IsDeleted\" = ?"
    );
    assert_eq!(stmt.params, vec![
      SqlValue::Text("Widget".into()),
      SqlValue::Integer(7),
      SqlValue::Integer(3),
      SqlValue::Integer(0),
    ]);
  }

  #[test]
  fn like_operands_are_escaped() {
    let stmt = count("Products", &[Condition {
      column: "Code".into(),
      op:     FilterOp::StartsWith,
      value:  Value::Text("50%_off".into()),
    }]);
    assert_eq!(
      stmt.sql,
      "SELECT COUNT(*) FROM \"Products\" WHERE \"Code\" LIKE ? ESCAPE '\\'"
    );
    assert_eq!(stmt.params, vec![SqlValue::Text("50\\%\\_off%".into())]);
  }

  #[test]
  fn null_equality_becomes_is_null() {
    let stmt = select("Products", &SelectSpec {
      columns:    None,
      conditions: vec![Condition::eq("Name", Value::Null)],
      order_by:   Some(OrderBy {
        column:     "Id".into(),
        descending: true,
      }),
      skip:       10,
      take:       5,
    });
    assert_eq!(
      stmt.sql,
      "SELECT * FROM \"Products\" WHERE \"Name\" IS NULL ORDER BY \"Id\" DESC LIMIT ? OFFSET ?"
    );
    assert_eq!(stmt.params, vec![SqlValue::Integer(5), SqlValue::Integer(10)]);
  }
}
