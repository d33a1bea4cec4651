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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Prefix marking a name as a placeholder to be bound before execution.
pub const VARIABLE_SIGIL: char = '$';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// Fully-qualified metric identifier, or a derived/public name to be
    /// rewritten by a layer.
    Metric(String),
    Tag(String),
    Variable(String),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expression>),
    Function(Function),
    Filter(Filter),
}

impl Expression {
    pub fn metric(name: impl Into<String>) -> Self {
        Expression::Metric(name.into())
    }

    pub fn tag(key: impl Into<String>) -> Self {
        Expression::Tag(key.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name
            .strip_prefix(VARIABLE_SIGIL)
            .map(str::to_string)
            .unwrap_or(name);
        Expression::Variable(name)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Str(value.into())
    }

    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expression>,
    {
        Expression::List(values.into_iter().map(Into::into).collect())
    }

    pub fn aggregate(function: AggregationFn, param: Expression) -> Self {
        Expression::Function(Function {
            function: FunctionName::Aggregation(function),
            params: vec![param],
        })
    }

    pub fn arithmetic(function: ArithmeticFn, lhs: Expression, rhs: Expression) -> Self {
        Expression::Function(Function {
            function: FunctionName::Arithmetic(function),
            params: vec![lhs, rhs],
        })
    }

    pub fn filter(inner: Expression, conditions: Vec<Condition>) -> Self {
        Expression::Filter(Filter {
            inner: Box::new(inner),
            conditions,
        })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Expression::Int(_) | Expression::Float(_) | Expression::Str(_)
        )
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Expression::Str(value.to_string())
    }
}

impl From<String> for Expression {
    fn from(value: String) -> Self {
        Expression::Str(value)
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Expression::Int(value)
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Float(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub function: FunctionName,
    #[serde(default)]
    pub params: Vec<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionName {
    Aggregation(AggregationFn),
    Arithmetic(ArithmeticFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFn {
    Sum,
    Count,
    Avg,
    Max,
    Min,
    P50,
    P75,
    P95,
    P99,
    CountUnique,
    Last,
}

impl AggregationFn {
    pub fn name(self) -> &'static str {
        match self {
            AggregationFn::Sum => "sum",
            AggregationFn::Count => "count",
            AggregationFn::Avg => "avg",
            AggregationFn::Max => "max",
            AggregationFn::Min => "min",
            AggregationFn::P50 => "p50",
            AggregationFn::P75 => "p75",
            AggregationFn::P95 => "p95",
            AggregationFn::P99 => "p99",
            AggregationFn::CountUnique => "count_unique",
            AggregationFn::Last => "last",
        }
    }

    pub fn quantile(self) -> Option<f64> {
        match self {
            AggregationFn::P50 => Some(0.5),
            AggregationFn::P75 => Some(0.75),
            AggregationFn::P95 => Some(0.95),
            AggregationFn::P99 => Some(0.99),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticFn {
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl ArithmeticFn {
    pub fn name(self) -> &'static str {
        match self {
            ArithmeticFn::Plus => "plus",
            ArithmeticFn::Minus => "minus",
            ArithmeticFn::Multiply => "multiply",
            ArithmeticFn::Divide => "divide",
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            ArithmeticFn::Plus => "+",
            ArithmeticFn::Minus => "-",
            ArithmeticFn::Multiply => "*",
            ArithmeticFn::Divide => "/",
        }
    }
}

impl Display for FunctionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionName::Aggregation(function) => write!(f, "{}", function.name()),
            FunctionName::Arithmetic(function) => write!(f, "{}", function.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub inner: Box<Expression>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub lhs: Expression,
    pub op: ConditionFn,
    pub rhs: Expression,
}

impl Condition {
    pub fn new(lhs: Expression, op: ConditionFn, rhs: impl Into<Expression>) -> Self {
        Self {
            lhs,
            op,
            rhs: rhs.into(),
        }
    }

    pub fn equals(tag: &str, value: impl Into<Expression>) -> Self {
        Self::new(Expression::tag(tag), ConditionFn::Equals, value)
    }

    pub fn not_equals(tag: &str, value: impl Into<Expression>) -> Self {
        Self::new(Expression::tag(tag), ConditionFn::NotEquals, value)
    }

    pub fn like(tag: &str, pattern: impl Into<Expression>) -> Self {
        Self::new(Expression::tag(tag), ConditionFn::Like, pattern)
    }

    pub fn not_like(tag: &str, pattern: impl Into<Expression>) -> Self {
        Self::new(Expression::tag(tag), ConditionFn::NotLike, pattern)
    }

    pub fn is_in<I, T>(tag: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expression>,
    {
        Self::new(Expression::tag(tag), ConditionFn::In, Expression::list(values))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionFn {
    Equals,
    NotEquals,
    Like,
    NotLike,
    In,
    NotIn,
}

impl ConditionFn {
    pub fn takes_list(self) -> bool {
        matches!(self, ConditionFn::In | ConditionFn::NotIn)
    }

    fn symbol(self) -> &'static str {
        match self {
            ConditionFn::Equals => "=",
            ConditionFn::NotEquals => "!=",
            ConditionFn::Like => "LIKE",
            ConditionFn::NotLike => "NOT LIKE",
            ConditionFn::In => "IN",
            ConditionFn::NotIn => "NOT IN",
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Metric(name) => write!(f, "{name}"),
            Expression::Tag(key) => write!(f, "{key}"),
            Expression::Variable(name) => write!(f, "{VARIABLE_SIGIL}{name}"),
            Expression::Int(value) => write!(f, "{value}"),
            Expression::Float(value) => write!(f, "{value}"),
            Expression::Str(value) => write!(f, "{value:?}"),
            Expression::List(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expression::Function(function) => {
                let params: Vec<String> =
                    function.params.iter().map(ToString::to_string).collect();
                write!(f, "{}({})", function.function, params.join(", "))
            }
            Expression::Filter(filter) => {
                let conditions: Vec<String> =
                    filter.conditions.iter().map(ToString::to_string).collect();
                write!(f, "{}{{{}}}", filter.inner, conditions.join(", "))
            }
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_nested_expression() {
        let expr = Expression::arithmetic(
            ArithmeticFn::Divide,
            Expression::aggregate(
                AggregationFn::Sum,
                Expression::filter(
                    Expression::metric("c:custom/errors@none"),
                    vec![Condition::equals("env", "prod")],
                ),
            ),
            Expression::aggregate(AggregationFn::Sum, Expression::metric("c:custom/total@none")),
        );
        assert_eq!(
            expr.to_string(),
            "divide(sum(c:custom/errors@none{env = \"prod\"}), sum(c:custom/total@none))"
        );
    }

    #[test]
    fn variable_constructor_strips_sigil() {
        assert_eq!(
            Expression::variable("$release"),
            Expression::Variable("release".into())
        );
        assert_eq!(Expression::variable("release").to_string(), "$release");
    }

    #[test]
    fn deserializes_function_names() {
        let expr: Expression = serde_json::from_str(
            r#"{"function": {"function": "count_unique", "params": [{"metric": "s:custom/users@none"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            expr,
            Expression::aggregate(
                AggregationFn::CountUnique,
                Expression::metric("s:custom/users@none")
            )
        );

        let condition: Condition =
            serde_json::from_str(r#"{"lhs": {"tag": "env"}, "op": "notIn", "rhs": {"list": [{"str": "dev"}]}}"#)
                .unwrap();
        assert_eq!(condition.op, ConditionFn::NotIn);
        assert!(condition.op.takes_list());
    }
}
