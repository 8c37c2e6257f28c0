//! Query shapes, cursors and result pages.

use crate::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Comparison applied by a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl FilterOp {
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Ne => "!=",
        }
    }

    /// Whether `property <op> operand` holds, given `property.cmp(operand)`.
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            FilterOp::Eq => ordering == Equal,
            FilterOp::Lt => ordering == Less,
            FilterOp::Le => ordering != Greater,
            FilterOp::Gt => ordering == Greater,
            FilterOp::Ge => ordering != Less,
            FilterOp::Ne => ordering != Equal,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Filter operand that may be left out on purpose.
///
/// `Omit` drops the filter from the query. It is not the same as filtering
/// on an empty or zero value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryValue {
    Value(Value),
    #[default]
    Omit,
}

impl QueryValue {
    pub fn of(value: impl Into<Value>) -> Self {
        QueryValue::Value(value.into())
    }

    /// `None` becomes `Omit`.
    pub fn from_option<V: Into<Value>>(value: Option<V>) -> Self {
        value.map_or(QueryValue::Omit, QueryValue::of)
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, QueryValue::Omit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Opaque position between two rows of one query shape.
///
/// Only meaningful for the kind, filters and order that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Everything a Store needs to run a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub kind: String,
    pub namespace: Option<String>,
    pub ancestor: Option<Key>,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub limit: Option<usize>,
    pub start: Option<Cursor>,
    pub end: Option<Cursor>,
    pub keys_only: bool,
}

impl QuerySpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Add a filter unless the operand is omitted.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: QueryValue) -> Self {
        if let QueryValue::Value(value) = value {
            self.filters.push(Filter {
                field: field.into(),
                op,
                value,
            });
        }
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, QueryValue::of(value))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, QueryValue::of(value))
    }

    pub fn le(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Le, QueryValue::of(value))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gt, QueryValue::of(value))
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Ge, QueryValue::of(value))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Ne, QueryValue::of(value))
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction: Direction::Ascending,
        });
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    pub fn end(mut self, cursor: Cursor) -> Self {
        self.end = Some(cursor);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ns) = &self.namespace {
            write!(f, " ns={}", ns)?;
        }
        if let Some(ancestor) = &self.ancestor {
            write!(f, " ancestor={}", ancestor)?;
        }
        for filter in &self.filters {
            write!(f, " {}{}{}", filter.field, filter.op, filter.value)?;
        }
        for order in &self.orders {
            let sign = match order.direction {
                Direction::Ascending => "+",
                Direction::Descending => "-",
            };
            write!(f, " {}{}", sign, order.field)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit={}", limit)?;
        }
        if self.keys_only {
            f.write_str(" keys-only")?;
        }
        Ok(())
    }
}

/// One fully drained query run.
///
/// `data[i]` belongs to `keys[i]`. Keys stay in process; only cursors and
/// data are serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "start")]
    pub start_cursor: Option<Cursor>,
    #[serde(rename = "end")]
    pub end_cursor: Option<Cursor>,
    pub data: Vec<T>,
    #[serde(skip)]
    pub keys: Vec<Key>,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            start_cursor: None,
            end_cursor: None,
            data: Vec::new(),
            keys: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_omitted_filter_is_dropped() {
        let spec = QuerySpec::new("Article")
            .filter("author", FilterOp::Eq, QueryValue::from_option(None::<String>))
            .filter("views", FilterOp::Ge, QueryValue::from_option(Some(0)));
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.filters[0].field, "views");
        assert_eq!(spec.filters[0].value, Value::from(0));
    }

    #[test]
    fn test_empty_string_is_a_real_filter() {
        let spec = QuerySpec::new("Article").eq("author", "");
        assert_eq!(spec.filters.len(), 1);
    }

    #[test]
    fn test_filter_op_accepts() {
        assert!(FilterOp::Le.accepts(Ordering::Equal));
        assert!(FilterOp::Le.accepts(Ordering::Less));
        assert!(!FilterOp::Lt.accepts(Ordering::Equal));
        assert!(FilterOp::Ne.accepts(Ordering::Greater));
        assert!(!FilterOp::Ge.accepts(Ordering::Less));
    }

    #[test]
    fn test_query_display() {
        let spec = QuerySpec::new("Article")
            .namespace(Some("t1"))
            .eq("state", "draft")
            .desc("updated_at")
            .limit(10)
            .keys_only();
        assert_eq!(
            spec.to_string(),
            "Article ns=t1 state=\"draft\" -updated_at limit=10 keys-only"
        );
    }

    #[test]
    fn test_page_serializes_without_keys() {
        let page = Page {
            start_cursor: Some(Cursor::from("a")),
            end_cursor: Some(Cursor::from("b")),
            data: vec![1, 2],
            keys: vec![Key::new("K", "x"), Key::new("K", "y")],
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json, serde_json::json!({"start": "a", "end": "b", "data": [1, 2]}));
    }
}
