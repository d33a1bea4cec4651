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

//! Metric resource identifiers: `<type>:<namespace>/<name>@<unit>`.

use std::fmt::Display;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::char,
    combinator::{all_consuming, map, value},
    error::{Error as NomError, context},
    sequence::preceded,
};
use thiserror::Error;

use crate::query::AggregationFn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mri {
    pub metric_type: MetricType,
    pub namespace: String,
    pub name: String,
    pub unit: String,
}

impl Mri {
    pub fn parse(input: &str) -> Result<Self, MriError> {
        all_consuming(mri)
            .parse(input)
            .map(|(_, mri)| mri)
            .map_err(|_| MriError::Invalid(input.to_string()))
    }

    /// Tenant-scoped namespace the metric is stored under.
    pub fn use_case(&self) -> &str {
        &self.namespace
    }

    pub fn entity(&self) -> Option<Entity> {
        self.metric_type.entity()
    }
}

impl Display for Mri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}@{}",
            self.metric_type.code(),
            self.namespace,
            self.name,
            self.unit
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MriError {
    #[error("`{0}` is not a valid metric resource identifier")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Distribution,
    Set,
    Gauge,
    Derived,
}

impl MetricType {
    fn code(self) -> char {
        match self {
            MetricType::Counter => 'c',
            MetricType::Distribution => 'd',
            MetricType::Set => 's',
            MetricType::Gauge => 'g',
            MetricType::Derived => 'e',
        }
    }

    pub fn entity(self) -> Option<Entity> {
        match self {
            MetricType::Counter => Some(Entity::Counters),
            MetricType::Distribution => Some(Entity::Distributions),
            MetricType::Set => Some(Entity::Sets),
            MetricType::Gauge => Some(Entity::Gauges),
            MetricType::Derived => None,
        }
    }
}

/// Physical storage shape backing one metric type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Counters,
    Distributions,
    Sets,
    Gauges,
}

impl Entity {
    pub fn allowed_aggregations(self) -> &'static [AggregationFn] {
        match self {
            Entity::Counters => &[AggregationFn::Sum],
            Entity::Distributions => &[
                AggregationFn::Count,
                AggregationFn::Avg,
                AggregationFn::Max,
                AggregationFn::Min,
                AggregationFn::P50,
                AggregationFn::P75,
                AggregationFn::P95,
                AggregationFn::P99,
            ],
            Entity::Sets => &[AggregationFn::CountUnique],
            Entity::Gauges => &[
                AggregationFn::Last,
                AggregationFn::Min,
                AggregationFn::Max,
                AggregationFn::Sum,
                AggregationFn::Count,
                AggregationFn::Avg,
            ],
        }
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Counters => write!(f, "counters"),
            Entity::Distributions => write!(f, "distributions"),
            Entity::Sets => write!(f, "sets"),
            Entity::Gauges => write!(f, "gauges"),
        }
    }
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

fn mri(input: &str) -> NomResult<'_, Mri> {
    map(
        (
            context("metric type", metric_type),
            context("namespace", preceded(char(':'), namespace)),
            context("metric name", preceded(char('/'), metric_name)),
            context("unit", preceded(char('@'), unit)),
        ),
        |(metric_type, namespace, name, unit)| Mri {
            metric_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
        },
    )
    .parse(input)
}

fn metric_type(input: &str) -> NomResult<'_, MetricType> {
    alt((
        value(MetricType::Counter, char('c')),
        value(MetricType::Distribution, char('d')),
        value(MetricType::Set, char('s')),
        value(MetricType::Gauge, char('g')),
        value(MetricType::Derived, char('e')),
    ))
    .parse(input)
}

fn namespace(input: &str) -> NomResult<'_, &str> {
    take_while1(|ch: char| ch.is_ascii_lowercase() || ch == '_').parse(input)
}

fn metric_name(input: &str) -> NomResult<'_, &str> {
    take_while1(is_name_char).parse(input)
}

fn unit(input: &str) -> NomResult<'_, &str> {
    take_while1(is_name_char).parse(input)
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distribution_mri() {
        let mri = Mri::parse("d:transactions/duration@millisecond").unwrap();
        assert_eq!(mri.metric_type, MetricType::Distribution);
        assert_eq!(mri.use_case(), "transactions");
        assert_eq!(mri.name, "duration");
        assert_eq!(mri.unit, "millisecond");
        assert_eq!(mri.entity(), Some(Entity::Distributions));
    }

    #[test]
    fn parse_dotted_name() {
        let mri = Mri::parse("c:custom/page.load_count@none").unwrap();
        assert_eq!(mri.metric_type, MetricType::Counter);
        assert_eq!(mri.name, "page.load_count");
        assert_eq!(mri.to_string(), "c:custom/page.load_count@none");
    }

    #[test]
    fn derived_mri_has_no_entity() {
        let mri = Mri::parse("e:sessions/crash_free_rate@ratio").unwrap();
        assert_eq!(mri.metric_type, MetricType::Derived);
        assert_eq!(mri.entity(), None);
    }

    #[test]
    fn rejects_plain_names() {
        assert!(Mri::parse("transaction.duration").is_err());
        assert!(Mri::parse("x:transactions/duration@ms").is_err());
        assert!(Mri::parse("d:transactions/duration").is_err());
        assert!(Mri::parse("d:transactions/duration@ms extra").is_err());
    }

    #[test]
    fn allowed_aggregations_follow_entity() {
        assert_eq!(
            Entity::Counters.allowed_aggregations(),
            &[AggregationFn::Sum]
        );
        assert!(
            Entity::Sets
                .allowed_aggregations()
                .contains(&AggregationFn::CountUnique)
        );
        assert!(
            !Entity::Counters
                .allowed_aggregations()
                .contains(&AggregationFn::CountUnique)
        );
    }
}
