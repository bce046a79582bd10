//! Table query and mutation builders
//!
//! These mirror the small subset of the REST table API that the app uses:
//! column selection with embedded related rows, equality filters, ordering,
//! limits and single-row reads. A builder is plain data; each backend decides
//! how to execute it.

use serde_json::Value;
use uuid::Uuid;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Oldest / smallest first
    Ascending,
    /// Newest / largest first
    Descending,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        }
    }
}

/// One `ORDER BY` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column name
    pub column: String,
    /// Sort direction
    pub direction: Direction,
}

/// Equality filter on a column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column name
    pub column: String,
    /// Value the column must equal (`null` means `IS NULL`)
    pub value: Value,
}

impl Filter {
    /// Create an equality filter
    #[inline]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this filter
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        values_equal(actual, &self.value)
    }

    /// Render as a `(column, operator.value)` query pair
    #[must_use]
    pub fn to_param(&self) -> (String, String) {
        let rendered = match &self.value {
            Value::Null => "is.null".to_string(),
            other => format!("eq.{}", render_value(other)),
        };
        (self.column.clone(), rendered)
    }
}

/// Render a filter value the way the table API expects it
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Loose equality: `"5"` equals `5`, UUID strings compare case-insensitively
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            x == y
                || matches!(
                    (Uuid::parse_str(x), Uuid::parse_str(y)),
                    (Ok(x), Ok(y)) if x == y
                )
        }
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => render_value(a) == render_value(b),
    }
}

/// Strip whitespace outside quoted identifiers from a select list
#[must_use]
pub fn compact_select(columns: &str) -> String {
    let mut quoted = false;
    columns
        .chars()
        .filter(|c| {
            if *c == '"' {
                quoted = !quoted;
            }
            quoted || !c.is_whitespace()
        })
        .collect()
}

/// Read query against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    columns: String,
    filters: Vec<Filter>,
    order: Vec<Order>,
    limit: Option<usize>,
    single: bool,
}

impl Query {
    /// Start a query on `table` selecting `*`
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            single: false,
        }
    }

    /// Select columns (may include embedded `relation(...)` groups)
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = compact_select(columns);
        self
    }

    /// Keep rows whose `column` equals `value`
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    /// Add a sort term
    #[must_use]
    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push(Order {
            column: column.into(),
            direction,
        });
        self
    }

    /// Limit number of rows
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Expect exactly one row; zero rows is a not-found error
    #[must_use]
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Table name
    #[inline]
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Compacted select list
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &str {
        &self.columns
    }

    /// Filters
    #[inline]
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Sort terms
    #[inline]
    #[must_use]
    pub fn ordering(&self) -> &[Order] {
        &self.order
    }

    /// Row limit
    #[inline]
    #[must_use]
    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Whether this is a single-row read
    #[inline]
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Render as query-string pairs
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, o.direction.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// Insert one or more rows
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    rows: Vec<Value>,
    returning: Option<String>,
}

impl Insert {
    /// Start an insert into `table`
    #[must_use]
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
            returning: None,
        }
    }

    /// Add a row (a JSON object)
    #[must_use]
    pub fn row(mut self, row: Value) -> Self {
        self.rows.push(row);
        self
    }

    /// Return inserted rows with this select list
    #[must_use]
    pub fn returning(mut self, columns: &str) -> Self {
        self.returning = Some(compact_select(columns));
        self
    }

    /// Table name
    #[inline]
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Rows to insert
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    /// Select list for returned rows, if any
    #[inline]
    #[must_use]
    pub fn returning_columns(&self) -> Option<&str> {
        self.returning.as_deref()
    }
}

/// Update rows matching filters
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    values: serde_json::Map<String, Value>,
    filters: Vec<Filter>,
}

impl Update {
    /// Start an update of `table`
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: serde_json::Map::new(),
            filters: Vec::new(),
        }
    }

    /// Set `column` to `value`
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Set several columns from a JSON object (non-objects are ignored)
    #[must_use]
    pub fn set_all(mut self, values: Value) -> Self {
        if let Value::Object(map) = values {
            self.values.extend(map);
        }
        self
    }

    /// Restrict to rows whose `column` equals `value`
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    /// Table name
    #[inline]
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// New column values
    #[inline]
    #[must_use]
    pub fn values(&self) -> &serde_json::Map<String, Value> {
        &self.values
    }

    /// Filters
    #[inline]
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

/// Delete rows matching filters
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    filters: Vec<Filter>,
}

impl Delete {
    /// Start a delete from `table`
    #[must_use]
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
        }
    }

    /// Restrict to rows whose `column` equals `value`
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    /// Table name
    #[inline]
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Filters
    #[inline]
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn compact_select_strips_layout_whitespace() {
        let select = compact_select(
            "
            id,
            content,
            user_profiles (
              id,
              display_name
            )
        ",
        );
        assert_eq!(select, "id,content,user_profiles(id,display_name)");
        assert_eq!(compact_select("\"odd name\", id"), "\"odd name\",id");
    }

    #[test]
    fn query_renders_params_in_order() {
        let query = Query::table("posts")
            .select("id, content")
            .eq("user_profile_id", "abc")
            .order("created_at", Direction::Descending)
            .limit(10);

        assert_eq!(
            query.to_params(),
            vec![
                ("select".to_string(), "id,content".to_string()),
                ("user_profile_id".to_string(), "eq.abc".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
        assert!(!query.is_single());
        assert!(query.single().is_single());
    }

    #[test]
    fn null_filter_renders_is_null() {
        assert_eq!(
            Filter::eq("image_url", Value::Null).to_param(),
            ("image_url".to_string(), "is.null".to_string())
        );
        assert_eq!(
            Filter::eq("id", 7).to_param(),
            ("id".to_string(), "eq.7".to_string())
        );
    }

    #[test]
    fn filter_matching_is_loose_on_representation() {
        let row = json!({
            "id": 7,
            "user_id": "1C9A2A9E-55B4-4A1F-9D3E-0A8D1D7C2B11",
            "image_url": null
        });
        assert!(Filter::eq("id", 7).matches(&row));
        assert!(Filter::eq("id", "7").matches(&row));
        assert!(Filter::eq("user_id", "1c9a2a9e-55b4-4a1f-9d3e-0a8d1d7c2b11").matches(&row));
        assert!(Filter::eq("image_url", Value::Null).matches(&row));
        assert!(Filter::eq("missing", Value::Null).matches(&row));
        assert!(!Filter::eq("id", 8).matches(&row));
    }

    #[test]
    fn text_filters_are_case_sensitive() {
        let row = json!({"content": "hello", "tag": "ABC-def"});
        assert!(Filter::eq("content", "hello").matches(&row));
        assert!(!Filter::eq("content", "Hello").matches(&row));
        assert!(!Filter::eq("tag", "abc-DEF").matches(&row));
    }

    #[test]
    fn update_collects_values() {
        let update = Update::table("posts")
            .set("content", "hello")
            .set_all(json!({"image_url": null}))
            .set_all(json!("ignored"))
            .eq("id", 3);

        assert_eq!(update.values().len(), 2);
        assert_eq!(update.values()["image_url"], Value::Null);
        assert_eq!(update.filters().len(), 1);
    }
}
