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

mod calculation;

use std::{future::Future, sync::Arc};

use log::debug;

use crate::{
    config::QueryConfig,
    error::QueryError,
    layers::{
        DerivedMetricRegistry, FilterMergeLayer, Layer, MacroExpansionLayer, PublicNameLayer,
        TimeframeLayer, ValidationLayer,
    },
    query::{SeriesQuery, SeriesResult},
};

/// Executes a batch of single-entity queries, one result per query in input
/// order.
pub trait Backend: Send + Sync {
    fn execute(
        &self,
        queries: Vec<SeriesQuery>,
    ) -> impl Future<Output = Result<Vec<SeriesResult>, QueryError>> + Send;
}

pub struct Pipeline<B> {
    layers: Vec<Box<dyn Layer>>,
    backend: B,
}

impl<B: Backend> Pipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            layers: Vec::new(),
            backend,
        }
    }

    /// Public names (when given), derived metric expansion, timeframe
    /// resolution, filter push-down, then validation.
    pub fn standard(
        backend: B,
        config: Arc<QueryConfig>,
        registry: Arc<DerivedMetricRegistry>,
        public_names: Option<PublicNameLayer>,
    ) -> Self {
        Self::new(backend)
            .with_optional_layer(public_names)
            .with_layer(MacroExpansionLayer::new(registry))
            .with_layer(TimeframeLayer::new(config))
            .with_layer(FilterMergeLayer)
            .with_layer(ValidationLayer)
    }

    pub fn with_layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Adds `layer` only when present; absent layers do not run at all.
    pub fn with_optional_layer(self, layer: Option<impl Layer + 'static>) -> Self {
        match layer {
            Some(layer) => self.with_layer(layer),
            None => self,
        }
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs every layer's query transform in order.
    pub fn rewrite(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        self.layers.iter().try_fold(query, |query, layer| {
            debug!("applying layer {}", layer.name());
            layer.transform_query(query)
        })
    }

    /// Rewritten sub-queries as they would be sent to the backend.
    pub fn plan(&self, query: SeriesQuery) -> Result<Vec<SeriesQuery>, QueryError> {
        let query = self.rewrite(query)?;
        Ok(calculation::split(query)?.queries)
    }

    pub async fn execute(&self, query: SeriesQuery) -> Result<SeriesResult, QueryError> {
        let query = self.rewrite(query)?;
        let mut plan = calculation::split(query)?;
        let queries = std::mem::take(&mut plan.queries);
        debug!("dispatching {} sub-quer(ies) to backend", queries.len());
        let results = self.backend.execute(queries).await?;
        let result = plan.merge(results)?;
        self.layers.iter().rev().try_fold(result, |result, layer| {
            debug!("applying layer {} to result", layer.name());
            layer.transform_result(result)
        })
    }
}
