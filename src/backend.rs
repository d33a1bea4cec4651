// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod cache;
mod convert;
mod databend;
mod sql;
mod translate;

pub use cache::CachingExecutor;
pub use databend::DatabendExecutor;
pub use translate::{BUCKET_ALIAS, PhysicalQuery, SelectItem, TranslatedQuery, translate_query};

use std::{collections::BTreeMap, future::Future, sync::Arc};

use log::debug;

use crate::{
    config::QueryConfig,
    error::QueryError,
    indexer::Indexer,
    pipeline::Backend,
    query::{SeriesQuery, SeriesResult},
};

/// One result row keyed by output column alias.
pub type RawRow = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
}

/// Runs physical statements. Implementations return one row set per
/// statement, in input order.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        queries: &[PhysicalQuery],
    ) -> impl Future<Output = Result<Vec<Vec<RawRow>>, QueryError>> + Send;
}

/// Translates logical sub-queries for the configured storage and folds the
/// rows back into results.
pub struct StorageBackend<E> {
    executor: E,
    config: Arc<QueryConfig>,
    indexer: Arc<dyn Indexer>,
}

impl<E: Executor> StorageBackend<E> {
    pub fn new(executor: E, config: Arc<QueryConfig>, indexer: Arc<dyn Indexer>) -> Self {
        Self {
            executor,
            config,
            indexer,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn translate(&self, query: &SeriesQuery) -> Result<TranslatedQuery, QueryError> {
        translate_query(query, &self.config, self.indexer.as_ref())
    }

    /// SQL statements `query` would run, series first.
    pub fn explain(&self, query: &SeriesQuery) -> Result<Vec<String>, QueryError> {
        Ok(self
            .translate(query)?
            .statements()
            .map(PhysicalQuery::to_sql)
            .collect())
    }
}

impl<E: Executor> Backend for StorageBackend<E> {
    async fn execute(&self, queries: Vec<SeriesQuery>) -> Result<Vec<SeriesResult>, QueryError> {
        let plans = queries
            .iter()
            .map(|query| self.translate(query))
            .collect::<Result<Vec<_>, _>>()?;
        let statements: Vec<PhysicalQuery> = plans
            .iter()
            .flat_map(TranslatedQuery::statements)
            .cloned()
            .collect();
        debug!(
            "executing {} statement(s) for {} sub-quer(ies)",
            statements.len(),
            queries.len()
        );
        let row_sets = self.executor.execute(&statements).await?;
        if row_sets.len() != statements.len() {
            return Err(QueryError::Internal(format!(
                "executor returned {} row sets for {} statements",
                row_sets.len(),
                statements.len()
            )));
        }

        let mut row_sets = row_sets.into_iter();
        let mut results = Vec::with_capacity(queries.len());
        for (query, plan) in queries.iter().zip(&plans) {
            let series = row_sets.next().unwrap_or_default();
            let totals = match plan.totals {
                Some(_) => Some(row_sets.next().unwrap_or_default()),
                None => None,
            };
            results.push(convert::convert_rows(query, series, totals)?);
        }
        Ok(results)
    }
}
