use std::fmt;

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::model::TRACKER_TABLE;
use crate::store::{Filter, RemoteStore};

const DATE_COLUMN: &str = "release_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkDeleteRequest {
    pub from: NaiveDate,
    pub include_nulls: bool,
}

impl BulkDeleteRequest {
    pub fn parse(date: &str, include_nulls: bool) -> Result<Self> {
        let date = date.trim();
        if date.is_empty() {
            return Err(Error::validation("Pick a date first for bulk delete."));
        }
        let from = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            Error::validation(format!("Invalid date '{date}'; expected YYYY-MM-DD."))
        })?;
        Ok(Self {
            from,
            include_nulls,
        })
    }

    pub fn date_str(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    fn range_filter(&self) -> Filter {
        Filter::gte(DATE_COLUMN, &self.date_str())
    }

    fn null_filter() -> Filter {
        Filter::is_null(DATE_COLUMN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPreview {
    pub request: BulkDeleteRequest,
    pub in_range: usize,
    pub null_dated: Option<usize>,
}

impl BulkPreview {
    pub fn total(&self) -> usize {
        self.in_range + self.null_dated.unwrap_or(0)
    }

    pub fn prompt(&self) -> String {
        let mut s = format!(
            "Delete {} tracker row(s) FROM {} onward (inclusive)? This cannot be undone.",
            self.total(),
            self.request.date_str()
        );
        if self.request.include_nulls {
            s.push_str(" Also includes rows with no release date.");
        }
        s
    }
}

impl fmt::Display for BulkPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bulk delete preview: {} tracker rows would be deleted from {} onward{}.",
            self.total(),
            self.request.date_str(),
            if self.request.include_nulls {
                " (including null dates)"
            } else {
                ""
            }
        )
    }
}

pub fn preview(store: &dyn RemoteStore, req: &BulkDeleteRequest) -> Result<BulkPreview> {
    let in_range = store.count(TRACKER_TABLE, &[req.range_filter()])?;
    let null_dated = if req.include_nulls {
        Some(store.count(TRACKER_TABLE, &[BulkDeleteRequest::null_filter()])?)
    } else {
        None
    };
    Ok(BulkPreview {
        request: *req,
        in_range,
        null_dated,
    })
}

#[derive(Debug, Clone)]
pub enum Branch {
    Deleted(usize),
    Failed(Error),
    Skipped,
    NotRequested,
}

impl Branch {
    fn ok(&self) -> bool {
        matches!(self, Branch::Deleted(_) | Branch::NotRequested)
    }

    fn count(&self) -> usize {
        match self {
            Branch::Deleted(n) => *n,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulkDeleteReport {
    pub request: BulkDeleteRequest,
    pub range: Branch,
    pub nulls: Branch,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.range.ok() && self.nulls.ok()
    }

    pub fn deleted(&self) -> usize {
        self.range.count() + self.nulls.count()
    }

    pub fn summary(&self) -> String {
        let date = self.request.date_str();
        match (&self.range, &self.nulls) {
            (Branch::Failed(e), _) => format!("Bulk delete failed: {e}"),
            (Branch::Deleted(n), Branch::Failed(e)) => format!(
                "Bulk delete partially failed: deleted {n} dated row(s) from {date} onward, \
                 but rows with no release date were NOT deleted: {e}"
            ),
            _ => format!("Deleted {} tracker row(s) from {date} onward.", self.deleted()),
        }
    }

    pub fn into_result(self) -> Result<usize> {
        if self.is_complete() {
            return Ok(self.deleted());
        }
        let summary = self.summary();
        match self.range {
            Branch::Failed(e) => Err(e),
            _ => Err(Error::partial(summary)),
        }
    }
}

// Not transactional: a failed null-date branch leaves the dated rows deleted.
pub fn execute(store: &dyn RemoteStore, req: &BulkDeleteRequest) -> BulkDeleteReport {
    let range = match store.delete_where(TRACKER_TABLE, &[req.range_filter()]) {
        Ok(n) => Branch::Deleted(n),
        Err(e) => Branch::Failed(e),
    };
    let nulls = if !req.include_nulls {
        Branch::NotRequested
    } else if !range.ok() {
        Branch::Skipped
    } else {
        match store.delete_where(TRACKER_TABLE, &[BulkDeleteRequest::null_filter()]) {
            Ok(n) => Branch::Deleted(n),
            Err(e) => Branch::Failed(e),
        }
    };
    let report = BulkDeleteReport {
        request: *req,
        range,
        nulls,
    };
    if report.is_complete() {
        tracing::info!(from = %req.date_str(), deleted = report.deleted(), "bulk delete done");
    } else {
        tracing::error!(from = %req.date_str(), summary = %report.summary(), "bulk delete incomplete");
    }
    report
}
