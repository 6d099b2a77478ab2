use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{LOGS_TABLE, PLAYS_TABLE, Row, SONGS_TABLE, TRACKER_TABLE, row_id};
use crate::status::StatusColumn;
use crate::store::{Filter, Order, RemoteStore, compare_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Query,
    Insert,
    Update,
    Delete,
    DeleteWhere,
    Count,
    Sample,
}

type ViewPredicate = fn(&Row) -> bool;

struct ViewDef {
    base: String,
    predicate: ViewPredicate,
}

struct FailRule {
    op: Op,
    relation: String,
    when_filter: Option<Filter>,
    remaining: Option<usize>,
    error: Error,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Row>>,
    views: BTreeMap<String, ViewDef>,
    columns: BTreeMap<String, BTreeSet<String>>,
    failures: Vec<FailRule>,
    calls: Vec<String>,
    next_id: i64,
    clock: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut inner = Inner {
            next_id: 1,
            ..Default::default()
        };
        for t in [SONGS_TABLE, TRACKER_TABLE, LOGS_TABLE, PLAYS_TABLE] {
            inner.tables.insert(t.to_string(), Vec::new());
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn with_tracker_views(self) -> Self {
        self.add_view("v_scheduled", TRACKER_TABLE, |r| {
            !StatusColumn::detect(Some(r)).is_live(r)
        });
        self.add_view("v_live", TRACKER_TABLE, |r| {
            StatusColumn::detect(Some(r)).is_live(r)
        });
        self
    }

    pub fn with_columns(self, table: &str, cols: &[&str]) -> Self {
        {
            let mut inner = self.lock();
            let set = inner.columns.entry(table.to_string()).or_default();
            for c in cols {
                set.insert((*c).to_string());
            }
            set.insert("id".into());
            set.insert("created_at".into());
        }
        self
    }

    pub fn add_view(&self, name: &str, base: &str, predicate: ViewPredicate) {
        self.lock().views.insert(
            name.to_string(),
            ViewDef {
                base: base.to_string(),
                predicate,
            },
        );
    }

    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut inner = self.lock();
        for mut row in rows {
            inner.stamp(&mut row);
            inner.tables.entry(table.to_string()).or_default().push(row);
        }
    }

    pub fn fail(&self, op: Op, relation: &str, error: Error) {
        self.push_rule(op, relation, None, None, error);
    }

    pub fn fail_once(&self, op: Op, relation: &str, error: Error) {
        self.push_rule(op, relation, None, Some(1), error);
    }

    pub fn fail_with_filter(&self, op: Op, relation: &str, filter: Filter, error: Error) {
        self.push_rule(op, relation, Some(filter), None, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: i64) -> Option<Row> {
        self.rows(table).into_iter().find(|r| row_id(r) == Some(id))
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn push_rule(
        &self,
        op: Op,
        relation: &str,
        when_filter: Option<Filter>,
        remaining: Option<usize>,
        error: Error,
    ) {
        self.lock().failures.push(FailRule {
            op,
            relation: relation.to_string(),
            when_filter,
            remaining,
            error,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge the other assertions.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Inner {
    fn stamp(&mut self, row: &mut Row) {
        match row_id(row) {
            Some(id) => self.next_id = self.next_id.max(id + 1),
            None => {
                row.insert("id".into(), Value::from(self.next_id));
                self.next_id += 1;
            }
        }
        if !row.contains_key("created_at") {
            self.clock += 1;
            let ts = chrono::DateTime::from_timestamp(1_735_689_600 + self.clock, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            row.insert("created_at".into(), Value::String(ts));
        }
    }

    fn enter(&mut self, op: Op, relation: &str, filters: &[Filter]) -> Result<()> {
        let label = match op {
            Op::Query => "query",
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::DeleteWhere => "delete_where",
            Op::Count => "count",
            Op::Sample => "sample",
        };
        self.calls.push(format!("{label} {relation}"));

        let hit = self.failures.iter().position(|r| {
            r.op == op
                && r.relation == relation
                && r.when_filter.as_ref().is_none_or(|f| filters.contains(f))
                && r.remaining != Some(0)
        });
        let Some(idx) = hit else {
            return Ok(());
        };
        let rule = &mut self.failures[idx];
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Err(rule.error.clone())
    }

    fn check_columns(&self, table: &str, row: &Row) -> Result<()> {
        let Some(cols) = self.columns.get(table) else {
            return Ok(());
        };
        match row.keys().find(|k| !cols.contains(*k)) {
            Some(k) => Err(Error::backend(
                Some("PGRST204".into()),
                format!("Could not find the '{k}' column of '{table}' in the schema cache"),
            )),
            None => Ok(()),
        }
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Vec<Row>> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| missing_relation(table))
    }
}

fn missing_relation(name: &str) -> Error {
    Error::backend(
        Some("42P01".into()),
        format!("relation \"public.{name}\" does not exist"),
    )
}

impl RemoteStore for MemoryStore {
    fn query(&self, relation: &str, filters: &[Filter], order: &[Order]) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        inner.enter(Op::Query, relation, filters)?;
        let mut rows: Vec<Row> = if let Some(view) = inner.views.get(relation) {
            let base = inner
                .tables
                .get(&view.base)
                .ok_or_else(|| missing_relation(&view.base))?;
            base.iter().filter(|r| (view.predicate)(r)).cloned().collect()
        } else {
            inner
                .tables
                .get(relation)
                .ok_or_else(|| missing_relation(relation))?
                .clone()
        };
        rows.retain(|r| filters.iter().all(|f| f.matches(r)));
        rows.sort_by(|a, b| compare_rows(a, b, order));
        Ok(rows)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Row> {
        let mut inner = self.lock();
        inner.enter(Op::Insert, table, &[])?;
        inner.check_columns(table, row)?;
        let mut row = row.clone();
        inner.stamp(&mut row);
        inner.table_mut(table)?.push(row.clone());
        Ok(row)
    }

    fn update(&self, table: &str, id: i64, patch: &Row) -> Result<Row> {
        let mut inner = self.lock();
        inner.enter(Op::Update, table, &[Filter::id(id)])?;
        inner.check_columns(table, patch)?;
        let rows = inner.table_mut(table)?;
        let Some(row) = rows.iter_mut().find(|r| row_id(r) == Some(id)) else {
            return Err(Error::not_found(format!("{table} row {id} not found")));
        };
        for (k, v) in patch {
            row.insert(k.clone(), v.clone());
        }
        Ok(row.clone())
    }

    fn delete(&self, table: &str, id: i64) -> Result<()> {
        let mut inner = self.lock();
        inner.enter(Op::Delete, table, &[Filter::id(id)])?;
        inner.table_mut(table)?.retain(|r| row_id(r) != Some(id));
        Ok(())
    }

    fn delete_where(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let mut inner = self.lock();
        inner.enter(Op::DeleteWhere, table, filters)?;
        let rows = inner.table_mut(table)?;
        let before = rows.len();
        rows.retain(|r| !filters.iter().all(|f| f.matches(r)));
        Ok(before - rows.len())
    }

    fn count(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let mut inner = self.lock();
        inner.enter(Op::Count, table, filters)?;
        let rows = inner
            .tables
            .get(table)
            .ok_or_else(|| missing_relation(table))?;
        Ok(rows
            .iter()
            .filter(|r| filters.iter().all(|f| f.matches(r)))
            .count())
    }

    fn sample(&self, relation: &str) -> Result<Option<Row>> {
        let mut inner = self.lock();
        inner.enter(Op::Sample, relation, &[])?;
        if let Some(view) = inner.views.get(relation) {
            let base = inner
                .tables
                .get(&view.base)
                .ok_or_else(|| missing_relation(&view.base))?;
            return Ok(base.iter().find(|r| (view.predicate)(r)).cloned());
        }
        let rows = inner
            .tables
            .get(relation)
            .ok_or_else(|| missing_relation(relation))?;
        Ok(rows.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn insert_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let a = store.insert("songs", &row(json!({"title": "A"}))).unwrap();
        let b = store.insert("songs", &row(json!({"title": "B"}))).unwrap();
        assert_eq!(row_id(&a), Some(1));
        assert_eq!(row_id(&b), Some(2));
        assert!(a["created_at"].as_str().unwrap() < b["created_at"].as_str().unwrap());
    }

    #[test]
    fn unknown_column_rejected_when_schema_declared() {
        let store = MemoryStore::new().with_columns("music_tracker", &["song_title", "streaming"]);
        let err = store
            .insert("music_tracker", &row(json!({"song_title": "x", "status": "live"})))
            .unwrap_err();
        assert!(err.is_unknown_column());
        store
            .insert("music_tracker", &row(json!({"song_title": "x", "streaming": "live"})))
            .unwrap();
    }

    #[test]
    fn views_missing_until_registered() {
        let store = MemoryStore::new();
        let err = store.query("v_live", &[], &[]).unwrap_err();
        assert_eq!(err.code(), Some("42P01"));

        let store = MemoryStore::new().with_tracker_views();
        store.seed(
            "music_tracker",
            vec![
                row(json!({"status": "live"})),
                row(json!({"status": "scheduled"})),
            ],
        );
        assert_eq!(store.query("v_live", &[], &[]).unwrap().len(), 1);
        assert_eq!(store.query("v_scheduled", &[], &[]).unwrap().len(), 1);
    }

    #[test]
    fn fail_once_recovers() {
        let store = MemoryStore::new();
        store.fail_once(Op::Count, "songs", Error::backend(None, "boom"));
        assert!(store.count("songs", &[]).is_err());
        assert_eq!(store.count("songs", &[]).unwrap(), 0);
    }
}
