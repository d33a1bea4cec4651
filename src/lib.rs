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

//! Compiles declarative metrics queries into Databend SQL and folds the rows
//! back into bucketed time series.
//!
//! A [`SeriesQuery`] passes through a [`Pipeline`] of [`Layer`]s that expand
//! derived metrics, resolve the timeframe, push filters down and validate
//! types. The rewritten query is split per storage entity and handed to a
//! [`Backend`]; results are merged and returned through the layers in reverse.

pub mod backend;
pub mod config;
pub mod error;
pub mod indexer;
pub mod layers;
pub mod mri;
pub mod pipeline;
pub mod query;

#[cfg(test)]
mod testing;

pub use backend::{CachingExecutor, DatabendExecutor, Executor, StorageBackend};
pub use config::QueryConfig;
pub use error::QueryError;
pub use layers::{DerivedMetricRegistry, Layer, PublicNameLayer};
pub use pipeline::{Backend, Pipeline};
pub use query::{Expression, SeriesQuery, SeriesResult};
