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

//! Splitting a query into per-entity sub-queries and joining their results.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::QueryError,
    mri::{Entity, Mri},
    query::{Expression, MetricCollector, SeriesQuery, SeriesResult, Visitor},
};

/// Sub-queries plus the original expression index of each of their
/// expressions.
#[derive(Debug)]
pub(crate) struct CalculationPlan {
    pub(crate) queries: Vec<SeriesQuery>,
    positions: Vec<Vec<usize>>,
    expression_count: usize,
}

fn expression_entity(index: usize, expr: &Expression) -> Result<Entity, QueryError> {
    let mut collector = MetricCollector::default();
    collector.visit(expr);
    let entities = collector
        .metrics
        .iter()
        .map(|name| {
            let mri = Mri::parse(name)?;
            mri.entity().ok_or_else(|| {
                QueryError::invalid(format!("derived metric `{name}` was not expanded"))
            })
        })
        .collect::<Result<BTreeSet<_>, _>>()?;
    let mut entities = entities.into_iter();
    match (entities.next(), entities.next()) {
        (Some(entity), None) => Ok(entity),
        (None, _) => Err(QueryError::invalid(format!(
            "expression {index} does not reference any metric"
        ))),
        (Some(first), Some(second)) => Err(QueryError::invalid(format!(
            "expression {index} must reference a single entity, found {first} and {second}"
        ))),
    }
}

pub(crate) fn split(query: SeriesQuery) -> Result<CalculationPlan, QueryError> {
    let expression_count = query.expressions.len();
    let mut by_entity: BTreeMap<Entity, Vec<usize>> = BTreeMap::new();
    for (index, expr) in query.expressions.iter().enumerate() {
        by_entity
            .entry(expression_entity(index, expr)?)
            .or_default()
            .push(index);
    }
    if by_entity.len() <= 1 {
        return Ok(CalculationPlan {
            queries: vec![query],
            positions: vec![(0..expression_count).collect()],
            expression_count,
        });
    }

    let positions: Vec<Vec<usize>> = by_entity.into_values().collect();
    let queries = positions
        .iter()
        .map(|indices| SeriesQuery {
            expressions: indices
                .iter()
                .map(|index| query.expressions[*index].clone())
                .collect(),
            ..query.clone()
        })
        .collect();
    Ok(CalculationPlan {
        queries,
        positions,
        expression_count,
    })
}

impl CalculationPlan {
    /// Outer-joins sub-query results on group and bucket. `results` must be
    /// in sub-query order.
    pub(crate) fn merge(self, results: Vec<SeriesResult>) -> Result<SeriesResult, QueryError> {
        if results.len() != self.positions.len() {
            return Err(QueryError::Internal(format!(
                "expected {} sub-query results, got {}",
                self.positions.len(),
                results.len()
            )));
        }
        let mut merged: Option<SeriesResult> = None;
        let mut intervals = BTreeSet::new();
        for (result, positions) in results.into_iter().zip(&self.positions) {
            let SeriesResult {
                start,
                end,
                interval,
                tags,
                intervals: sub_intervals,
                groups,
                totals,
                ..
            } = result;
            let target = merged.get_or_insert_with(|| SeriesResult {
                start,
                end,
                interval,
                expression_count: self.expression_count,
                ..Default::default()
            });
            intervals.extend(sub_intervals);
            for (key, values) in tags {
                target.tags.entry(key).or_default().extend(values);
            }
            for (group, series) in groups {
                let slot = target.groups.entry(group).or_default();
                for (local, values) in series {
                    slot.insert(original_index(positions, local)?, values);
                }
            }
            for (group, values) in totals {
                let slot = target.totals.entry(group).or_default();
                for (local, value) in values {
                    slot.insert(original_index(positions, local)?, value);
                }
            }
        }
        let mut merged = merged.unwrap_or_default();
        merged.intervals = intervals.into_iter().collect();
        Ok(merged)
    }
}

fn original_index(positions: &[usize], local: usize) -> Result<usize, QueryError> {
    positions.get(local).copied().ok_or_else(|| {
        QueryError::Internal(format!("sub-query returned unknown expression {local}"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        query::{AggregationFn, ArithmeticFn, GroupKey},
        testing::six_hour_query,
    };

    fn sum(name: &str) -> Expression {
        Expression::aggregate(AggregationFn::Sum, Expression::metric(name))
    }

    fn p99(name: &str) -> Expression {
        Expression::aggregate(AggregationFn::P99, Expression::metric(name))
    }

    #[test]
    fn single_entity_is_not_split() {
        let query = six_hour_query()
            .expr(sum("c:custom/a@none"))
            .expr(sum("c:custom/b@none"));
        let plan = split(query.clone()).unwrap();
        assert_eq!(plan.queries, vec![query]);
    }

    #[test]
    fn splits_by_entity_and_merges_in_original_order() {
        let query = six_hour_query()
            .expr(p99("d:custom/latency@millisecond"))
            .expr(sum("c:custom/hits@none"))
            .expr(p99("d:custom/ttfb@millisecond"));
        let plan = split(query).unwrap();
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[0].expressions, vec![sum("c:custom/hits@none")]);
        assert_eq!(plan.queries[1].expressions.len(), 2);

        let group = GroupKey::new([("env", "prod")]);
        let start = Utc.timestamp_opt(0, 0).unwrap();
        let sub_result = |values: &[(usize, i64, f64)]| {
            let mut result = SeriesResult {
                start,
                end: Utc.timestamp_opt(180, 0).unwrap(),
                interval: 60,
                ..Default::default()
            };
            for (index, bucket, value) in values {
                result
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .entry(*index)
                    .or_default()
                    .insert(*bucket, *value);
                result.intervals.push(*bucket);
            }
            result
        };
        let merged = plan
            .merge(vec![
                sub_result(&[(0, 60, 10.0)]),
                sub_result(&[(0, 0, 1.0), (1, 120, 3.0)]),
            ])
            .unwrap();

        assert_eq!(merged.expression_count, 3);
        assert_eq!(merged.intervals, vec![0, 60, 120]);
        assert_eq!(merged.value(&group, 0, 0), Some(1.0));
        assert_eq!(merged.value(&group, 1, 60), Some(10.0));
        assert_eq!(merged.value(&group, 2, 120), Some(3.0));
        assert_eq!(merged.value(&group, 1, 0), None);
    }

    #[test]
    fn expression_spanning_entities_is_rejected() {
        let query = six_hour_query().expr(Expression::arithmetic(
            ArithmeticFn::Divide,
            p99("d:custom/latency@millisecond"),
            sum("c:custom/hits@none"),
        ));
        let err = split(query).unwrap_err();
        assert!(err.to_string().contains("single entity"));
    }

    #[test]
    fn merge_checks_result_count() {
        let plan = split(six_hour_query().expr(sum("c:custom/a@none"))).unwrap();
        assert!(matches!(plan.merge(Vec::new()), Err(QueryError::Internal(_))));
    }
}
