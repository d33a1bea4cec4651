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

mod expression;
mod result;
mod visitor;

pub use expression::{
    AggregationFn, ArithmeticFn, Condition, ConditionFn, Expression, Filter, Function,
    FunctionName, VARIABLE_SIGIL,
};
pub use result::{GroupKey, GroupResponse, SeriesResponse, SeriesResult};
pub use visitor::{Transform, Visitor};
pub(crate) use visitor::MetricCollector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub org_id: u64,
    pub project_ids: Vec<u64>,
}

impl Scope {
    pub fn new(org_id: u64, project_ids: impl IntoIterator<Item = u64>) -> Self {
        let mut project_ids: Vec<u64> = project_ids.into_iter().collect();
        project_ids.sort_unstable();
        project_ids.dedup();
        Self {
            org_id,
            project_ids,
        }
    }
}

/// Half-open `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollup {
    /// Bucket width in seconds; `None` asks for one to be inferred.
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub totals: bool,
}

impl Rollup {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn with_interval(interval: u64) -> Self {
        Self {
            interval: Some(interval),
            totals: false,
        }
    }

    pub fn totals(mut self, totals: bool) -> Self {
        self.totals = totals;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub scope: Scope,
    pub range: TimeRange,
    #[serde(default)]
    pub expressions: Vec<Expression>,
    #[serde(default)]
    pub filters: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub rollup: Rollup,
}

impl SeriesQuery {
    pub fn new(scope: Scope, range: TimeRange) -> Self {
        Self {
            scope,
            range,
            expressions: Vec::new(),
            filters: Vec::new(),
            groups: Vec::new(),
            rollup: Rollup::auto(),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.range = TimeRange::new(start, end);
        self
    }

    pub fn expr(mut self, expression: Expression) -> Self {
        self.expressions.push(expression);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn group(mut self, tag: impl Into<String>) -> Self {
        self.groups.push(tag.into());
        self
    }

    pub fn rollup(mut self, rollup: Rollup) -> Self {
        self.rollup = rollup;
        self
    }

    pub fn interval(&self) -> Option<u64> {
        self.rollup.interval
    }
}
