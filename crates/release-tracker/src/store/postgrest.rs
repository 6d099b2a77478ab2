use std::time::Duration;

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ResolvedBackend;
use crate::error::{Error, Result};
use crate::model::Row;
use crate::store::{Filter, Order, RemoteStore};

pub struct PostgrestStore {
    client: Client,
    base: String,
    key: String,
}

#[derive(Debug, Deserialize, Default)]
struct PgError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl PostgrestStore {
    pub fn new(cfg: &ResolvedBackend) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: format!("{}/rest/v1", cfg.url.trim_end_matches('/')),
            key: cfg.anon_key.clone(),
        })
    }

    fn url(&self, relation: &str, filters: &[Filter], order: &[Order]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{relation}", self.base))
            .map_err(|e| Error::config(format!("invalid backend url {}: {e}", self.base)))?;
        {
            let mut q = url.query_pairs_mut();
            for f in filters {
                let (k, v) = filter_param(f);
                q.append_pair(&k, &v);
            }
            if let Some(o) = order_param(order) {
                q.append_pair("order", &o);
            }
        }
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    fn send(&self, what: &str, req: RequestBuilder) -> Result<Response> {
        let res = self
            .authed(req)
            .send()
            .map_err(|e| Error::backend(None, format!("{what} failed: {e}")))?;
        if res.status().is_success() {
            return Ok(res);
        }
        Err(error_from_response(what, res))
    }

    fn rows(&self, what: &str, res: Response) -> Result<Vec<Row>> {
        let body = res
            .text()
            .map_err(|e| Error::backend(None, format!("{what}: failed to read body: {e}")))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let v: Value = serde_json::from_str(&body)
            .map_err(|e| Error::backend(None, format!("{what}: invalid JSON: {e}")))?;
        match v {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|i| match i {
                    Value::Object(m) => Some(m),
                    _ => None,
                })
                .collect()),
            Value::Object(m) => Ok(vec![m]),
            _ => Err(Error::backend(None, format!("{what}: unexpected response shape"))),
        }
    }
}

fn error_from_response(what: &str, res: Response) -> Error {
    let status = res.status();
    let body = res.text().unwrap_or_default();
    let pg: PgError = serde_json::from_str(&body).unwrap_or_default();
    let mut msg = pg
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("{what} failed with status {status}"));
    if let Some(d) = pg.details.filter(|d| !d.trim().is_empty()) {
        msg.push_str(&format!(": {d}"));
    }
    if let Some(h) = pg.hint.filter(|h| !h.trim().is_empty()) {
        msg.push_str(&format!(" (hint: {h})"));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        msg = format!("{what} not authorized: {msg}");
    }
    Error::backend(pg.code, msg)
}

fn quote_value(raw: &str) -> String {
    if raw.chars().any(|c| matches!(c, ',' | '(' | ')' | ':' | '"' | '\\')) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw.to_string()
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn filter_param(f: &Filter) -> (String, String) {
    render_filter(f, false)
}

// Quoting is only understood inside `or=(...)` lists; top-level values are literal.
fn render_filter(f: &Filter, nested: bool) -> (String, String) {
    let value = |raw: &str| {
        if nested {
            quote_value(raw)
        } else {
            raw.to_string()
        }
    };
    match f {
        Filter::Eq(col, v) => (col.clone(), format!("eq.{}", value(scalar(v).as_str()))),
        Filter::Gte(col, v) => (col.clone(), format!("gte.{}", value(v.as_str()))),
        Filter::IsNull(col) => (col.clone(), "is.null".to_string()),
        Filter::AnyOf(inner) => {
            let parts: Vec<String> = inner
                .iter()
                .map(|f| {
                    let (k, v) = render_filter(f, true);
                    format!("{k}.{v}")
                })
                .collect();
            ("or".to_string(), format!("({})", parts.join(",")))
        }
    }
}

pub fn order_param(order: &[Order]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let parts: Vec<String> = order
        .iter()
        .map(|o| {
            format!(
                "{}.{}.{}",
                o.column,
                if o.ascending { "asc" } else { "desc" },
                if o.nulls_last { "nullslast" } else { "nullsfirst" }
            )
        })
        .collect();
    Some(parts.join(","))
}

pub fn parse_content_range_total(raw: &str) -> Option<usize> {
    raw.rsplit_once('/')?.1.trim().parse().ok()
}

impl RemoteStore for PostgrestStore {
    fn query(&self, relation: &str, filters: &[Filter], order: &[Order]) -> Result<Vec<Row>> {
        let mut url = self.url(relation, filters, order)?;
        url.query_pairs_mut().append_pair("select", "*");
        tracing::debug!(relation, "query");
        let res = self.send(&format!("query {relation}"), self.client.get(url))?;
        self.rows(relation, res)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<Row> {
        let url = self.url(table, &[], &[])?;
        let req = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(row);
        let res = self.send(&format!("insert into {table}"), req)?;
        self.rows(table, res)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::backend(None, format!("insert into {table} returned no row")))
    }

    fn update(&self, table: &str, id: i64, patch: &Row) -> Result<Row> {
        let url = self.url(table, &[Filter::id(id)], &[])?;
        let req = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(patch);
        let res = self.send(&format!("update {table}"), req)?;
        self.rows(table, res)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("{table} row {id} not found")))
    }

    fn delete(&self, table: &str, id: i64) -> Result<()> {
        let url = self.url(table, &[Filter::id(id)], &[])?;
        self.send(&format!("delete from {table}"), self.client.delete(url))?;
        Ok(())
    }

    fn delete_where(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        if filters.is_empty() {
            return Err(Error::validation(format!(
                "refusing unfiltered delete on {table}"
            )));
        }
        let url = self.url(table, filters, &[])?;
        let req = self
            .client
            .delete(url)
            .header("Prefer", "return=representation");
        let res = self.send(&format!("delete from {table}"), req)?;
        Ok(self.rows(table, res)?.len())
    }

    fn count(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let mut url = self.url(table, filters, &[])?;
        url.query_pairs_mut().append_pair("select", "id");
        let req = self.client.head(url).header("Prefer", "count=exact");
        let res = self.send(&format!("count {table}"), req)?;
        res.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| Error::backend(None, format!("count {table}: missing Content-Range")))
    }

    fn sample(&self, relation: &str) -> Result<Option<Row>> {
        let mut url = self.url(relation, &[], &[])?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("limit", "1");
        let res = self.send(&format!("sample {relation}"), self.client.get(url))?;
        Ok(self.rows(relation, res)?.into_iter().next())
    }
}
