use std::sync::Arc;

use tracing::debug;

use crate::dates::normalize_log_date;
use crate::log_store::{LogStore, LogStoreError};
use crate::models::{Category, CategoryTally, DateRange, LogRow};

/// Reads the changes log and keeps the rows inside a date range.
/// Every call re-reads the whole log; nothing is cached between requests.
#[derive(Clone)]
pub struct LogScanner {
    store: Arc<dyn LogStore>,
}

impl LogScanner {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    pub async fn fetch_filtered(&self, range: &DateRange) -> Result<Vec<LogRow>, LogStoreError> {
        let rows = self.store.read_all_rows().await?;
        let total = rows.len();
        let (rows, malformed) = filter_rows(rows, range);
        debug!(
            total,
            malformed,
            kept = rows.len(),
            start = %range.start,
            end = %range.end,
            "scanned changes log"
        );
        Ok(rows)
    }
}

/// Returns the rows inside `range` and the number of rows skipped as malformed
fn filter_rows(rows: Vec<Vec<String>>, range: &DateRange) -> (Vec<LogRow>, usize) {
    let mut malformed = 0;
    let mut kept = Vec::new();

    for row in rows {
        let mut cells = row.into_iter();
        let (Some(date), Some(category)) = (cells.next(), cells.next()) else {
            malformed += 1;
            continue;
        };
        let date = normalize_log_date(&date);
        if range.contains(&date) {
            kept.push(LogRow { date, category });
        }
    }

    (kept, malformed)
}

/// Counts rows per known category.
/// Categories outside the fixed set are ignored, the log carries other kinds of changes too.
pub struct Aggregator;

impl Aggregator {
    pub fn tally(rows: &[LogRow]) -> CategoryTally {
        let mut tally = CategoryTally::new();
        let mut ignored = 0usize;

        for row in rows {
            match Category::from_label(&row.category) {
                Some(category) => tally.increment(category),
                None => ignored += 1,
            }
        }

        if ignored > 0 {
            debug!(ignored, "rows with unrecognized categories");
        }
        tally
    }
}
