//! Fixtures shared by unit tests.

use std::{collections::VecDeque, sync::Mutex};

use chrono::{TimeZone, Utc};

use crate::{
    backend::{CellValue, Executor, PhysicalQuery, RawRow},
    config::{QueryConfig, TagStorage, UseCaseConfig},
    error::QueryError,
    indexer::StaticIndexer,
    query::{Scope, SeriesQuery, TimeRange},
};

/// Org 1, project 1, 2024-01-01 00:00 to 06:00 UTC, no expressions.
pub(crate) fn six_hour_query() -> SeriesQuery {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
    SeriesQuery::new(Scope::new(1, [1]), TimeRange::new(start, end))
}

/// `transactions` stores raw tags in the `metrics` database; `custom` is
/// indexed through [`test_indexer`].
pub(crate) fn test_config() -> QueryConfig {
    let mut transactions = UseCaseConfig::new(vec![60, 3600, 86400], TagStorage::Raw);
    transactions.database = Some("metrics".into());
    QueryConfig::default()
        .with_use_case("transactions", transactions)
        .and_then(|config| {
            config.with_use_case(
                "custom",
                UseCaseConfig::new(vec![10, 60, 3600], TagStorage::Indexed),
            )
        })
        .unwrap()
}

pub(crate) fn test_indexer() -> StaticIndexer {
    StaticIndexer::default()
        .with("custom", "c:custom/hits@none", 1)
        .with("custom", "d:custom/latency@millisecond", 2)
        .with("custom", "s:custom/users@none", 3)
        .with("custom", "c:custom/errors@none", 4)
        .with("custom", "g:custom/memory@byte", 5)
        .with("custom", "env", 10)
        .with("custom", "transaction", 11)
}

pub(crate) fn row(pairs: impl IntoIterator<Item = (&'static str, CellValue)>) -> RawRow {
    pairs
        .into_iter()
        .map(|(alias, value)| (alias.to_string(), value))
        .collect()
}

/// Answers statements with queued row sets, in call order.
#[derive(Default)]
pub(crate) struct StaticExecutor {
    responses: Mutex<VecDeque<Vec<RawRow>>>,
    statements: Mutex<Vec<String>>,
}

impl StaticExecutor {
    pub(crate) fn respond(self, rows: Vec<RawRow>) -> Self {
        self.responses.lock().unwrap().push_back(rows);
        self
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

impl Executor for StaticExecutor {
    async fn execute(&self, queries: &[PhysicalQuery]) -> Result<Vec<Vec<RawRow>>, QueryError> {
        let mut responses = self.responses.lock().unwrap();
        let mut statements = self.statements.lock().unwrap();
        Ok(queries
            .iter()
            .map(|query| {
                statements.push(query.to_sql());
                responses.pop_front().unwrap_or_default()
            })
            .collect())
    }
}
