//! Select-list parsing and row projection with embedded relations

use serde_json::{Map, Value};

use super::schema::{Relation, Schema};
use super::Tables;
use crate::error::BackendError;
use crate::query::values_equal;

/// One entry of a select list
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectItem {
    /// `*`
    All,
    /// A plain column
    Column(String),
    /// `relation(items...)`
    Embed {
        relation: String,
        items: Vec<SelectItem>,
    },
}

/// Parse a compacted select list such as `id,user_profiles(id,display_name)`
pub(crate) fn parse(columns: &str) -> Result<Vec<SelectItem>, BackendError> {
    let mut items = Vec::new();
    for part in split_top_level(columns)? {
        if part.is_empty() {
            continue;
        }
        if part == "*" {
            items.push(SelectItem::All);
        } else if let Some(open) = part.find('(') {
            if !part.ends_with(')') {
                return Err(parse_error(columns));
            }
            let relation = part[..open].to_string();
            let inner = &part[open + 1..part.len() - 1];
            if relation.is_empty() {
                return Err(parse_error(columns));
            }
            items.push(SelectItem::Embed {
                relation,
                items: parse(inner)?,
            });
        } else {
            items.push(SelectItem::Column(part.trim_matches('"').to_string()));
        }
    }
    if items.is_empty() {
        items.push(SelectItem::All);
    }
    Ok(items)
}

fn parse_error(columns: &str) -> BackendError {
    BackendError::Api {
        status: 400,
        message: format!("failed to parse select parameter ({columns})"),
    }
}

/// Split on commas that are not nested inside parentheses
fn split_top_level(columns: &str) -> Result<Vec<&str>, BackendError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in columns.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| parse_error(columns))?;
            }
            ',' if depth == 0 => {
                parts.push(&columns[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(parse_error(columns));
    }
    parts.push(&columns[start..]);
    Ok(parts)
}

/// Project `row` of `table` onto `items`, resolving embeds through `schema`
pub(crate) fn project(
    row: &Value,
    table: &str,
    items: &[SelectItem],
    tables: &Tables,
    schema: &Schema,
) -> Result<Value, BackendError> {
    let mut out = Map::new();
    for item in items {
        match item {
            SelectItem::All => {
                if let Value::Object(map) = row {
                    for (k, v) in map {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            SelectItem::Column(column) => {
                out.insert(
                    column.clone(),
                    row.get(column).cloned().unwrap_or(Value::Null),
                );
            }
            SelectItem::Embed { relation, items } => {
                let embedded = embed(row, table, relation, items, tables, schema)?;
                out.insert(relation.clone(), embedded);
            }
        }
    }
    Ok(Value::Object(out))
}

fn embed(
    row: &Value,
    table: &str,
    relation: &str,
    items: &[SelectItem],
    tables: &Tables,
    schema: &Schema,
) -> Result<Value, BackendError> {
    let Some(link) = schema.relation(table, relation) else {
        return Err(BackendError::Api {
            status: 400,
            message: format!(
                "Could not find a relationship between '{table}' and '{relation}' in the schema cache"
            ),
        });
    };

    match link {
        Relation::ManyToOne { column, .. } => {
            let key = row.get(column).unwrap_or(&Value::Null);
            if key.is_null() {
                return Ok(Value::Null);
            }
            let target = tables
                .rows(relation)
                .iter()
                .find(|candidate| candidate.get("id").is_some_and(|id| values_equal(id, key)));
            match target {
                Some(target) => project(target, relation, items, tables, schema),
                None => Ok(Value::Null),
            }
        }
        Relation::OneToMany { column, .. } => {
            let Some(id) = row.get("id") else {
                return Ok(Value::Array(Vec::new()));
            };
            let children = tables
                .rows(relation)
                .iter()
                .filter(|child| child.get(column).is_some_and(|fk| values_equal(fk, id)))
                .map(|child| project(child, relation, items, tables, schema))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(children))
        }
    }
}
