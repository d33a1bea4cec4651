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

use crate::{
    error::QueryError,
    query::{Condition, Expression, Filter, SeriesQuery, Transform},
};

use super::Layer;

/// Pushes query-level and enclosing filter conditions down onto each metric
/// leaf. After this pass every filter wraps exactly one metric.
pub struct FilterMergeLayer;

impl Layer for FilterMergeLayer {
    fn name(&self) -> &'static str {
        "filter_merge"
    }

    fn transform_query(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        FilterMerger::default().transform_query(query)
    }
}

#[derive(Default)]
struct FilterMerger {
    /// Outermost conditions first.
    stack: Vec<Vec<Condition>>,
}

impl Transform for FilterMerger {
    fn transform_query(&mut self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        let SeriesQuery {
            scope,
            range,
            expressions,
            filters,
            groups,
            rollup,
        } = query;
        self.stack.push(filters);
        let expressions = expressions
            .into_iter()
            .map(|expr| self.transform(expr))
            .collect::<Result<Vec<_>, _>>();
        self.stack.pop();
        Ok(SeriesQuery {
            scope,
            range,
            expressions: expressions?,
            filters: Vec::new(),
            groups,
            rollup,
        })
    }

    fn transform_filter(&mut self, filter: Filter) -> Result<Expression, QueryError> {
        let Filter { inner, conditions } = filter;
        self.stack.push(conditions);
        let inner = self.transform(*inner);
        self.stack.pop();
        inner
    }

    fn transform_metric(&mut self, name: String) -> Result<Expression, QueryError> {
        let conditions: Vec<Condition> = self.stack.iter().flatten().cloned().collect();
        if conditions.is_empty() {
            return Ok(Expression::Metric(name));
        }
        Ok(Expression::filter(Expression::Metric(name), conditions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        query::{AggregationFn, ArithmeticFn},
        testing::six_hour_query,
    };

    const DURATION: &str = "d:transactions/duration@millisecond";

    #[test]
    fn query_filters_land_before_local_ones() {
        let query = six_hour_query()
            .expr(Expression::aggregate(
                AggregationFn::Max,
                Expression::filter(
                    Expression::metric(DURATION),
                    vec![Condition::equals("tag", "a")],
                ),
            ))
            .filter(Condition::equals("tag2", "b"));
        let merged = FilterMergeLayer.transform_query(query).unwrap();

        assert!(merged.filters.is_empty());
        assert_eq!(
            merged.expressions[0],
            Expression::aggregate(
                AggregationFn::Max,
                Expression::filter(
                    Expression::metric(DURATION),
                    vec![Condition::equals("tag2", "b"), Condition::equals("tag", "a")],
                ),
            )
        );
    }

    #[test]
    fn nested_filters_concatenate_outermost_first() {
        let query = six_hour_query().expr(Expression::aggregate(
            AggregationFn::Max,
            Expression::filter(
                Expression::filter(
                    Expression::metric(DURATION),
                    vec![Condition::equals("tag", "a")],
                ),
                vec![Condition::equals("tag2", "b")],
            ),
        ));
        let merged = FilterMergeLayer.transform_query(query).unwrap();

        assert_eq!(
            merged.expressions[0],
            Expression::aggregate(
                AggregationFn::Max,
                Expression::filter(
                    Expression::metric(DURATION),
                    vec![Condition::equals("tag2", "b"), Condition::equals("tag", "a")],
                ),
            )
        );
    }

    #[test]
    fn filters_over_functions_reach_every_leaf() {
        let query = six_hour_query().expr(Expression::filter(
            Expression::arithmetic(
                ArithmeticFn::Divide,
                Expression::aggregate(AggregationFn::Sum, Expression::metric("c:custom/a@none")),
                Expression::aggregate(AggregationFn::Sum, Expression::metric("c:custom/b@none")),
            ),
            vec![Condition::not_equals("env", "dev")],
        ));
        let merged = FilterMergeLayer.transform_query(query).unwrap();
        let leaf = |name: &str| {
            Expression::aggregate(
                AggregationFn::Sum,
                Expression::filter(
                    Expression::metric(name),
                    vec![Condition::not_equals("env", "dev")],
                ),
            )
        };
        assert_eq!(
            merged.expressions[0],
            Expression::arithmetic(
                ArithmeticFn::Divide,
                leaf("c:custom/a@none"),
                leaf("c:custom/b@none")
            )
        );
    }

    #[test]
    fn merging_is_idempotent() {
        let query = six_hour_query()
            .expr(Expression::aggregate(
                AggregationFn::P95,
                Expression::filter(
                    Expression::filter(
                        Expression::metric(DURATION),
                        vec![Condition::is_in("env", ["prod", "staging"])],
                    ),
                    vec![Condition::equals("transaction", "/api")],
                ),
            ))
            .filter(Condition::equals("release", "1.0"));
        let once = FilterMergeLayer.transform_query(query).unwrap();
        let twice = FilterMergeLayer.transform_query(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unfiltered_leaves_stay_bare() {
        let query = six_hour_query().expr(Expression::aggregate(
            AggregationFn::Sum,
            Expression::metric("c:custom/a@none"),
        ));
        let merged = FilterMergeLayer.transform_query(query.clone()).unwrap();
        assert_eq!(merged, query);
    }
}
