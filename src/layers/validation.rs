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

use std::{collections::BTreeSet, fmt::Display};

use crate::{
    error::QueryError,
    mri::{Entity, Mri},
    query::{
        Condition, Expression, Filter, Function, FunctionName, SeriesQuery, VARIABLE_SIGIL,
        Visitor,
    },
};

use super::Layer;

/// Type assigned to an expression node during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    /// A raw metric, aggregatable by its entity's functions.
    Metric(Entity),
    /// One value per bucket and group.
    Vector,
    Scalar,
}

impl Display for ExprType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprType::Metric(entity) => write!(f, "raw {entity} metric"),
            ExprType::Vector => write!(f, "aggregated series"),
            ExprType::Scalar => write!(f, "scalar"),
        }
    }
}

pub struct ValidationLayer;

impl Layer for ValidationLayer {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn transform_query(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        validate_query(&query)?;
        Ok(query)
    }
}

pub fn validate_query(query: &SeriesQuery) -> Result<(), QueryError> {
    if query.range.start >= query.range.end {
        return Err(QueryError::invalid("start must be before end"));
    }
    match query.rollup.interval {
        Some(interval) if interval > 0 => {}
        _ => {
            return Err(QueryError::invalid(
                "rollup interval must be resolved to a positive number of seconds",
            ));
        }
    }
    if query.expressions.is_empty() {
        return Err(QueryError::invalid("query has no expressions"));
    }

    let mut checker = TypeChecker::default();
    for (index, expr) in query.expressions.iter().enumerate() {
        match checker.visit(expr)? {
            ExprType::Vector => {}
            other => {
                return Err(QueryError::invalid(format!(
                    "expression {index} must produce an aggregated series, found {other} `{expr}`"
                )));
            }
        }
    }
    for condition in &query.filters {
        checker.check_condition(condition)?;
    }

    match checker.use_cases.len() {
        1 => Ok(()),
        0 => Err(QueryError::invalid("query does not reference any metric")),
        _ => Err(QueryError::invalid(format!(
            "query mixes use cases: {}",
            checker
                .use_cases
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[derive(Default)]
struct TypeChecker {
    use_cases: BTreeSet<String>,
}

impl TypeChecker {
    fn check_condition(&mut self, condition: &Condition) -> Result<(), QueryError> {
        if !matches!(condition.lhs, Expression::Tag(_)) {
            return Err(QueryError::invalid(format!(
                "condition `{condition}` must compare a tag"
            )));
        }
        if condition.op.takes_list() {
            let Expression::List(values) = &condition.rhs else {
                return Err(unbound_or(&condition.rhs, || {
                    format!("condition `{condition}` expects a list of values")
                }));
            };
            if values.is_empty() {
                return Err(QueryError::invalid(format!(
                    "condition `{condition}` has an empty list"
                )));
            }
            for value in values {
                if !value.is_scalar() {
                    return Err(unbound_or(value, || {
                        format!("condition `{condition}` may only list literal values")
                    }));
                }
            }
        } else if !condition.rhs.is_scalar() {
            return Err(unbound_or(&condition.rhs, || {
                format!("condition `{condition}` expects a single literal value")
            }));
        }
        Ok(())
    }
}

fn unbound_or(value: &Expression, reason: impl FnOnce() -> String) -> QueryError {
    match value {
        Expression::Variable(name) => unbound(name),
        _ => QueryError::invalid(reason()),
    }
}

fn unbound(name: &str) -> QueryError {
    QueryError::invalid(format!("variable `{VARIABLE_SIGIL}{name}` is not bound"))
}

impl Visitor for TypeChecker {
    type Output = Result<ExprType, QueryError>;

    fn visit_metric(&mut self, name: &str) -> Self::Output {
        if let Some(variable) = name.strip_prefix(VARIABLE_SIGIL) {
            return Err(unbound(variable));
        }
        let mri = Mri::parse(name)?;
        let Some(entity) = mri.entity() else {
            return Err(QueryError::invalid(format!(
                "derived metric `{name}` was not expanded"
            )));
        };
        self.use_cases.insert(mri.use_case().to_string());
        Ok(ExprType::Metric(entity))
    }

    fn visit_tag(&mut self, key: &str) -> Self::Output {
        Err(QueryError::invalid(format!(
            "tag `{key}` can only appear in conditions and groups"
        )))
    }

    fn visit_variable(&mut self, name: &str) -> Self::Output {
        Err(unbound(name))
    }

    fn visit_scalar(&mut self, _value: &Expression) -> Self::Output {
        Ok(ExprType::Scalar)
    }

    fn visit_list(&mut self, _values: &[Expression]) -> Self::Output {
        Err(QueryError::invalid(
            "lists can only appear on the right of `in` and `notIn`",
        ))
    }

    fn visit_function(&mut self, function: &Function) -> Self::Output {
        match function.function {
            FunctionName::Aggregation(aggregation) => {
                let [param] = function.params.as_slice() else {
                    return Err(QueryError::invalid(format!(
                        "`{}` takes exactly one parameter, got {}",
                        aggregation.name(),
                        function.params.len()
                    )));
                };
                match self.visit(param)? {
                    ExprType::Metric(entity) => {
                        if !entity.allowed_aggregations().contains(&aggregation) {
                            return Err(QueryError::invalid(format!(
                                "`{}` is not supported for {entity} metrics",
                                aggregation.name()
                            )));
                        }
                        Ok(ExprType::Vector)
                    }
                    other => Err(QueryError::invalid(format!(
                        "`{}` expects a raw metric, found {other} `{param}`",
                        aggregation.name()
                    ))),
                }
            }
            FunctionName::Arithmetic(arithmetic) => {
                if function.params.len() != 2 {
                    return Err(QueryError::invalid(format!(
                        "`{}` takes exactly two parameters, got {}",
                        arithmetic.name(),
                        function.params.len()
                    )));
                }
                for param in &function.params {
                    let found = self.visit(param)?;
                    if found != ExprType::Vector {
                        return Err(QueryError::invalid(format!(
                            "`{}` expects aggregated series, found {found} `{param}`",
                            arithmetic.name()
                        )));
                    }
                }
                Ok(ExprType::Vector)
            }
        }
    }

    fn visit_filter(&mut self, filter: &Filter) -> Self::Output {
        for condition in &filter.conditions {
            self.check_condition(condition)?;
        }
        self.visit(&filter.inner)
    }
}
