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

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    config::{QueryConfig, UseCaseConfig},
    error::QueryError,
    mri::Mri,
    query::{SeriesQuery, TimeRange},
};

use super::Layer;

pub const MAX_BUCKETS: u64 = 360;

/// Resolves the rollup interval and aligns the range to bucket boundaries
/// measured from the unix epoch.
pub struct TimeframeLayer {
    config: Arc<QueryConfig>,
}

impl TimeframeLayer {
    pub fn new(config: Arc<QueryConfig>) -> Self {
        Self { config }
    }

    fn use_case(&self, query: &SeriesQuery) -> Option<&UseCaseConfig> {
        query
            .metric_names()
            .iter()
            .filter_map(|name| Mri::parse(name).ok())
            .find_map(|mri| self.config.use_case(mri.use_case()).ok())
    }
}

impl Layer for TimeframeLayer {
    fn name(&self) -> &'static str {
        "timeframe"
    }

    fn transform_query(&self, mut query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        let use_case = self.use_case(&query);
        let window = u64::try_from(query.range.seconds()).unwrap_or(0);
        let interval = match (query.rollup.interval, use_case) {
            (Some(requested), Some(use_case)) => {
                round_to_base(requested, use_case.base_granularity())
            }
            (Some(requested), None) => requested,
            (None, Some(use_case)) => round_to_base(
                infer_interval(&use_case.granularities, window),
                use_case.base_granularity(),
            ),
            (None, None) => {
                debug!("no known use case in query; leaving timeframe unresolved");
                return Ok(query);
            }
        };
        if interval == 0 {
            return Ok(query);
        }
        query.range = align_range(query.range, interval);
        query.rollup.interval = Some(interval);
        debug!(
            "timeframe resolved: interval={}s, start={}, end={}",
            interval, query.range.start, query.range.end
        );
        Ok(query)
    }
}

/// Smallest granularity yielding at most [`MAX_BUCKETS`] buckets over
/// `window` seconds, or the largest one when none does.
pub fn infer_interval(granularities: &[u64], window: u64) -> u64 {
    granularities
        .iter()
        .copied()
        .find(|granularity| window <= granularity.saturating_mul(MAX_BUCKETS))
        .or_else(|| granularities.last().copied())
        .unwrap_or(0)
}

/// Rounds to the nearest positive multiple of `base`.
pub fn round_to_base(interval: u64, base: u64) -> u64 {
    if base == 0 {
        return interval;
    }
    (interval.saturating_add(base / 2) / base).max(1) * base
}

pub fn align_range(range: TimeRange, interval: u64) -> TimeRange {
    let Ok(step) = i64::try_from(interval) else {
        return range;
    };
    if step <= 0 {
        return range;
    }
    let start = range.start.timestamp().div_euclid(step) * step;
    let end_secs = range.end.timestamp() + i64::from(range.end.timestamp_subsec_nanos() > 0);
    let remainder = end_secs.rem_euclid(step);
    let end = if remainder == 0 {
        end_secs
    } else {
        end_secs - remainder + step
    };
    match (
        DateTime::<Utc>::from_timestamp(start, 0),
        DateTime::<Utc>::from_timestamp(end, 0),
    ) {
        (Some(start), Some(end)) => TimeRange::new(start, end),
        _ => range,
    }
}
