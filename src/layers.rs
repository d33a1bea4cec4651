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

mod expansion;
mod filters;
mod naming;
mod timeframe;
mod validation;
mod variables;

pub use expansion::{DerivedMetricRegistry, MAX_EXPANSION_DEPTH, MacroExpansionLayer};
pub use filters::FilterMergeLayer;
pub use naming::PublicNameLayer;
pub use timeframe::{MAX_BUCKETS, TimeframeLayer, align_range, infer_interval, round_to_base};
pub use validation::{ExprType, ValidationLayer, validate_query};

use crate::{
    error::QueryError,
    query::{SeriesQuery, SeriesResult},
};

/// One named pass of the pipeline. Queries flow through layers in order and
/// results flow back in reverse.
pub trait Layer: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform_query(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        Ok(query)
    }

    fn transform_result(&self, result: SeriesResult) -> Result<SeriesResult, QueryError> {
        Ok(result)
    }
}
