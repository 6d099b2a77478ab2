use std::cmp::Ordering;

use serde_json::Value;

use crate::error::Result;
use crate::model::Row;

pub mod memory;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, String),
    IsNull(String),
    AnyOf(Vec<Filter>),
}

impl Filter {
    pub fn eq(col: &str, v: impl Into<Value>) -> Self {
        Filter::Eq(col.to_string(), v.into())
    }

    pub fn gte(col: &str, v: &str) -> Self {
        Filter::Gte(col.to_string(), v.to_string())
    }

    pub fn is_null(col: &str) -> Self {
        Filter::IsNull(col.to_string())
    }

    pub fn id(id: i64) -> Self {
        Filter::eq("id", id)
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(col, want) => row.get(col).is_some_and(|v| loose_eq(v, want)),
            Filter::Gte(col, min) => match row.get(col) {
                Some(Value::String(s)) => s.as_str() >= min.as_str(),
                Some(Value::Number(n)) => match (n.as_f64(), min.parse::<f64>()) {
                    (Some(a), Ok(b)) => a >= b,
                    _ => false,
                },
                _ => false,
            },
            Filter::IsNull(col) => matches!(row.get(col), None | Some(Value::Null)),
            Filter::AnyOf(inner) => inner.iter().any(|f| f.matches(row)),
        }
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
    pub nulls_last: bool,
}

impl Order {
    pub fn asc(col: &str) -> Self {
        Self {
            column: col.to_string(),
            ascending: true,
            nulls_last: true,
        }
    }

    pub fn desc(col: &str) -> Self {
        Self {
            column: col.to_string(),
            ascending: false,
            nulls_last: false,
        }
    }
}

pub fn tracker_order() -> Vec<Order> {
    vec![Order::asc("release_date"), Order::desc("created_at")]
}

pub fn compare_rows(a: &Row, b: &Row, order: &[Order]) -> Ordering {
    for o in order {
        let va = a.get(&o.column).filter(|v| !v.is_null());
        let vb = b.get(&o.column).filter(|v| !v.is_null());
        let ord = match (va, vb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => {
                if o.nulls_last {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Some(_), None) => {
                if o.nulls_last {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                if o.ascending { ord } else { ord.reverse() }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// Send + Sync: a refresh loads both caches on separate threads.
pub trait RemoteStore: Send + Sync {
    fn query(&self, relation: &str, filters: &[Filter], order: &[Order]) -> Result<Vec<Row>>;

    fn insert(&self, table: &str, row: &Row) -> Result<Row>;

    fn update(&self, table: &str, id: i64, patch: &Row) -> Result<Row>;

    fn delete(&self, table: &str, id: i64) -> Result<()>;

    fn delete_where(&self, table: &str, filters: &[Filter]) -> Result<usize>;

    fn count(&self, table: &str, filters: &[Filter]) -> Result<usize>;

    // At most one row, used to detect which columns a relation carries.
    fn sample(&self, relation: &str) -> Result<Option<Row>>;
}
