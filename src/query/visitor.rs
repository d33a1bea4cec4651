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

//! Walking and rewriting the expression tree.
//!
//! [`Visitor`] inspects a tree by reference and produces a value per node.
//! [`Transform`] consumes a tree and rebuilds it; every method has an identity
//! default, so a pass only overrides the node kinds it cares about.

use std::collections::BTreeSet;

use crate::error::QueryError;

use super::{Condition, Expression, Filter, Function, SeriesQuery};

pub trait Visitor {
    type Output;

    fn visit(&mut self, expr: &Expression) -> Self::Output {
        match expr {
            Expression::Metric(name) => self.visit_metric(name),
            Expression::Tag(key) => self.visit_tag(key),
            Expression::Variable(name) => self.visit_variable(name),
            Expression::Int(_) | Expression::Float(_) | Expression::Str(_) => {
                self.visit_scalar(expr)
            }
            Expression::List(values) => self.visit_list(values),
            Expression::Function(function) => self.visit_function(function),
            Expression::Filter(filter) => self.visit_filter(filter),
        }
    }

    fn visit_metric(&mut self, name: &str) -> Self::Output;

    fn visit_tag(&mut self, key: &str) -> Self::Output;

    fn visit_variable(&mut self, name: &str) -> Self::Output;

    fn visit_scalar(&mut self, value: &Expression) -> Self::Output;

    fn visit_list(&mut self, values: &[Expression]) -> Self::Output;

    fn visit_function(&mut self, function: &Function) -> Self::Output;

    fn visit_filter(&mut self, filter: &Filter) -> Self::Output;
}

pub trait Transform {
    fn transform_query(&mut self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        let SeriesQuery {
            scope,
            range,
            expressions,
            filters,
            groups,
            rollup,
        } = query;
        let expressions = expressions
            .into_iter()
            .map(|expr| self.transform(expr))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = filters
            .into_iter()
            .map(|condition| self.transform_condition(condition))
            .collect::<Result<Vec<_>, _>>()?;
        let groups = groups
            .into_iter()
            .map(|tag| self.transform_tag(tag))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SeriesQuery {
            scope,
            range,
            expressions,
            filters,
            groups,
            rollup,
        })
    }

    fn transform(&mut self, expr: Expression) -> Result<Expression, QueryError> {
        match expr {
            Expression::Metric(name) => self.transform_metric(name),
            Expression::Tag(key) => self.transform_tag(key).map(Expression::Tag),
            Expression::Variable(name) => self.transform_variable(name),
            Expression::List(values) => values
                .into_iter()
                .map(|value| self.transform(value))
                .collect::<Result<Vec<_>, _>>()
                .map(Expression::List),
            Expression::Function(function) => self.transform_function(function),
            Expression::Filter(filter) => self.transform_filter(filter),
            scalar @ (Expression::Int(_) | Expression::Float(_) | Expression::Str(_)) => {
                self.transform_scalar(scalar)
            }
        }
    }

    fn transform_metric(&mut self, name: String) -> Result<Expression, QueryError> {
        Ok(Expression::Metric(name))
    }

    fn transform_tag(&mut self, key: String) -> Result<String, QueryError> {
        Ok(key)
    }

    fn transform_variable(&mut self, name: String) -> Result<Expression, QueryError> {
        Ok(Expression::Variable(name))
    }

    fn transform_scalar(&mut self, value: Expression) -> Result<Expression, QueryError> {
        Ok(value)
    }

    fn transform_function(&mut self, function: Function) -> Result<Expression, QueryError> {
        let Function { function, params } = function;
        let params = params
            .into_iter()
            .map(|param| self.transform(param))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expression::Function(Function { function, params }))
    }

    fn transform_filter(&mut self, filter: Filter) -> Result<Expression, QueryError> {
        let Filter { inner, conditions } = filter;
        let inner = self.transform(*inner)?;
        let conditions = conditions
            .into_iter()
            .map(|condition| self.transform_condition(condition))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expression::Filter(Filter {
            inner: Box::new(inner),
            conditions,
        }))
    }

    fn transform_condition(&mut self, condition: Condition) -> Result<Condition, QueryError> {
        let Condition { lhs, op, rhs } = condition;
        Ok(Condition {
            lhs: self.transform(lhs)?,
            op,
            rhs: self.transform(rhs)?,
        })
    }
}

/// Collects every metric name referenced outside of conditions.
#[derive(Debug, Default)]
pub(crate) struct MetricCollector {
    pub(crate) metrics: BTreeSet<String>,
}

impl Visitor for MetricCollector {
    type Output = ();

    fn visit_metric(&mut self, name: &str) {
        self.metrics.insert(name.to_string());
    }

    fn visit_tag(&mut self, _key: &str) {}

    fn visit_variable(&mut self, _name: &str) {}

    fn visit_scalar(&mut self, _value: &Expression) {}

    fn visit_list(&mut self, values: &[Expression]) {
        for value in values {
            self.visit(value);
        }
    }

    fn visit_function(&mut self, function: &Function) {
        for param in &function.params {
            self.visit(param);
        }
    }

    fn visit_filter(&mut self, filter: &Filter) {
        self.visit(&filter.inner);
    }
}

impl SeriesQuery {
    pub fn metric_names(&self) -> BTreeSet<String> {
        let mut collector = MetricCollector::default();
        for expr in &self.expressions {
            collector.visit(expr);
        }
        collector.metrics
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{AggregationFn, ArithmeticFn, ConditionFn};
    use crate::testing::six_hour_query;

    use super::*;

    struct Identity;

    impl Transform for Identity {}

    struct UppercaseTags;

    impl Transform for UppercaseTags {
        fn transform_tag(&mut self, key: String) -> Result<String, QueryError> {
            Ok(key.to_uppercase())
        }
    }

    fn sample_query() -> SeriesQuery {
        six_hour_query()
            .expr(Expression::arithmetic(
                ArithmeticFn::Divide,
                Expression::aggregate(
                    AggregationFn::Sum,
                    Expression::filter(
                        Expression::metric("c:custom/errors@none"),
                        vec![Condition::new(
                            Expression::tag("env"),
                            ConditionFn::In,
                            Expression::list(["prod", "staging"]),
                        )],
                    ),
                ),
                Expression::aggregate(
                    AggregationFn::Sum,
                    Expression::metric("c:custom/total@none"),
                ),
            ))
            .filter(Condition::equals("release", Expression::variable("release")))
            .group("transaction")
    }

    #[test]
    fn identity_transform_preserves_query() {
        let query = sample_query();
        let transformed = Identity.transform_query(query.clone()).unwrap();
        assert_eq!(transformed, query);
    }

    #[test]
    fn overriding_one_case_leaves_others_untouched() {
        let query = UppercaseTags.transform_query(sample_query()).unwrap();
        assert_eq!(query.groups, vec!["TRANSACTION".to_string()]);
        assert_eq!(query.filters[0].lhs, Expression::tag("RELEASE"));
        assert_eq!(
            query.filters[0].rhs,
            Expression::Variable("release".to_string())
        );
        let Expression::Function(divide) = &query.expressions[0] else {
            panic!("expected function");
        };
        assert_eq!(
            divide.params[1],
            Expression::aggregate(
                AggregationFn::Sum,
                Expression::metric("c:custom/total@none")
            )
        );
    }

    #[test]
    fn collector_reaches_metrics_under_filters() {
        let names: Vec<String> = sample_query().metric_names().into_iter().collect();
        assert_eq!(names, vec!["c:custom/errors@none", "c:custom/total@none"]);
    }
}
