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

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Tag pairs identifying one grouped series.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(BTreeMap<String, String>);

impl GroupKey {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.0.get(tag).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// Values per expression index, per bucket start (unix seconds).
pub type ExpressionSeries = BTreeMap<usize, BTreeMap<i64, f64>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesResult {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: u64,
    pub expression_count: usize,
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub intervals: Vec<i64>,
    pub groups: BTreeMap<GroupKey, ExpressionSeries>,
    pub totals: BTreeMap<GroupKey, BTreeMap<usize, f64>>,
}

impl SeriesResult {
    /// Every bucket start of the aligned range, whether or not data exists.
    pub fn buckets(&self) -> impl Iterator<Item = i64> + '_ {
        let step = i64::try_from(self.interval).unwrap_or(0);
        let end = self.end.timestamp();
        let mut next = (step > 0).then(|| self.start.timestamp());
        std::iter::from_fn(move || {
            let current = next?;
            if current >= end {
                return None;
            }
            next = Some(current + step);
            Some(current)
        })
    }

    pub fn value(&self, group: &GroupKey, expression: usize, bucket: i64) -> Option<f64> {
        self.groups
            .get(group)?
            .get(&expression)?
            .get(&bucket)
            .copied()
    }

    pub fn series(&self, group: &GroupKey, expression: usize) -> Vec<(i64, Option<f64>)> {
        self.buckets()
            .map(|bucket| (bucket, self.value(group, expression, bucket)))
            .collect()
    }

    pub fn total(&self, group: &GroupKey, expression: usize) -> Option<f64> {
        self.totals.get(group)?.get(&expression).copied()
    }

    pub fn group_keys(&self) -> BTreeSet<&GroupKey> {
        self.groups.keys().chain(self.totals.keys()).collect()
    }

    pub fn to_response(&self) -> SeriesResponse {
        let buckets: Vec<i64> = self.buckets().collect();
        let groups = self
            .group_keys()
            .into_iter()
            .map(|group| GroupResponse {
                by: group.tags().clone(),
                series: (0..self.expression_count)
                    .map(|expression| {
                        buckets
                            .iter()
                            .map(|bucket| self.value(group, expression, *bucket))
                            .collect()
                    })
                    .collect(),
                totals: (0..self.expression_count)
                    .map(|expression| self.total(group, expression))
                    .collect(),
            })
            .collect();
        SeriesResponse {
            start: self.start,
            end: self.end,
            interval: self.interval,
            intervals: buckets
                .iter()
                .filter_map(|bucket| Utc.timestamp_opt(*bucket, 0).single())
                .collect(),
            groups,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: u64,
    pub intervals: Vec<DateTime<Utc>>,
    pub groups: Vec<GroupResponse>,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub by: BTreeMap<String, String>,
    pub series: Vec<Vec<Option<f64>>>,
    pub totals: Vec<Option<f64>>,
}
