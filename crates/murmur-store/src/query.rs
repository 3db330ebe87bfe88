use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{lookup, lookup_set_contains};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document in the collection.
    All,
    /// `field == value`.
    Eq { field: String, value: Value },
    /// The array at `field` contains `value`.
    ArrayContains { field: String, value: Value },
    /// A single document by id.
    Id(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A live query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filter: Filter,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filter: Filter::All,
            order_by: None,
            limit: None,
        }
    }

    /// Query matching exactly one document.
    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            filter: Filter::Id(id.into()),
            ..Self::collection(collection)
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Filter::Eq {
            field: field.into(),
            value: value.into(),
        };
        self
    }

    pub fn array_contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        };
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, id: &str, body: &Value) -> bool {
        match &self.filter {
            Filter::All => true,
            Filter::Id(want) => want == id,
            Filter::Eq { field, value } => lookup(body, field) == Some(value),
            Filter::ArrayContains { field, value } => lookup_set_contains(body, field, value),
        }
    }

    /// Compare two document bodies under this query's ordering. Documents
    /// without the ordered field sort first ascending.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let Some(order) = &self.order_by else {
            return Ordering::Equal;
        };
        let ord = compare_values(lookup(a, &order.field), lookup(b, &order.field));
        match order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            // Timestamps are stored as RFC 3339 strings with mixed precision.
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.with_timezone(&Utc).cmp(&y.with_timezone(&Utc)),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
