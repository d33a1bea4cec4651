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

use std::{collections::HashMap, path::Path, sync::Arc};

use log::{debug, info};

use crate::{
    error::QueryError,
    mri::{MetricType, Mri},
    query::{Expression, SeriesQuery, Transform, VARIABLE_SIGIL},
};

use super::Layer;

/// Nested expansions deeper than this are treated as a definition cycle.
pub const MAX_EXPANSION_DEPTH: usize = 16;

/// Derived metric definitions, built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct DerivedMetricRegistry {
    metrics: HashMap<String, Expression>,
}

impl DerivedMetricRegistry {
    pub fn from_json(raw: &str) -> Result<Self, QueryError> {
        let metrics: HashMap<String, Expression> = serde_json::from_str(raw)
            .map_err(|err| QueryError::Config(format!("invalid derived metrics: {err}")))?;
        Ok(Self { metrics })
    }

    pub fn from_file(path: &Path) -> Result<Self, QueryError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            QueryError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let registry = Self::from_json(&raw)?;
        info!(
            "loaded {} derived metric(s) from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, expansion: Expression) {
        self.metrics.insert(name.into(), expansion);
    }

    pub fn with(mut self, name: impl Into<String>, expansion: Expression) -> Self {
        self.register(name, expansion);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

pub struct MacroExpansionLayer {
    registry: Arc<DerivedMetricRegistry>,
}

impl MacroExpansionLayer {
    pub fn new(registry: Arc<DerivedMetricRegistry>) -> Self {
        Self { registry }
    }
}

impl Layer for MacroExpansionLayer {
    fn name(&self) -> &'static str {
        "macro_expansion"
    }

    fn transform_query(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        Expander {
            registry: &self.registry,
            depth: 0,
        }
        .transform_query(query)
    }
}

struct Expander<'a> {
    registry: &'a DerivedMetricRegistry,
    depth: usize,
}

impl Transform for Expander<'_> {
    fn transform_metric(&mut self, name: String) -> Result<Expression, QueryError> {
        if name.starts_with(VARIABLE_SIGIL) {
            return Ok(Expression::Metric(name));
        }
        let Some(expansion) = self.registry.get(&name) else {
            if is_derived(&name) {
                return Err(QueryError::invalid(format!(
                    "derived metric `{name}` is not registered"
                )));
            }
            return Ok(Expression::Metric(name));
        };
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err(QueryError::invalid(format!(
                "expanding `{name}` exceeded {MAX_EXPANSION_DEPTH} levels; derived metrics may be cyclic"
            )));
        }
        debug!("expanding derived metric {name}");
        self.depth += 1;
        let expanded = self.transform(expansion.clone());
        self.depth -= 1;
        expanded
    }
}

fn is_derived(name: &str) -> bool {
    Mri::parse(name).is_ok_and(|mri| mri.metric_type == MetricType::Derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        query::{AggregationFn, ArithmeticFn, Condition, Visitor},
        testing::six_hour_query,
    };

    const CRASH_FREE: &str = "e:sessions/crash_free_rate@ratio";
    const CRASHED: &str = "e:sessions/crashed@none";

    fn sessions() -> Expression {
        Expression::aggregate(AggregationFn::Sum, Expression::metric("c:sessions/session@none"))
    }

    fn registry() -> DerivedMetricRegistry {
        DerivedMetricRegistry::default()
            .with(
                CRASHED,
                Expression::aggregate(
                    AggregationFn::Sum,
                    Expression::filter(
                        Expression::metric("c:sessions/session@none"),
                        vec![Condition::equals("session.status", "crashed")],
                    ),
                ),
            )
            .with(
                CRASH_FREE,
                Expression::arithmetic(
                    ArithmeticFn::Minus,
                    Expression::Int(1),
                    Expression::arithmetic(
                        ArithmeticFn::Divide,
                        Expression::metric(CRASHED),
                        sessions(),
                    ),
                ),
            )
    }

    fn expand(
        registry: DerivedMetricRegistry,
        query: SeriesQuery,
    ) -> Result<SeriesQuery, QueryError> {
        MacroExpansionLayer::new(Arc::new(registry)).transform_query(query)
    }

    struct DerivedFinder(bool);

    impl Visitor for DerivedFinder {
        type Output = ();

        fn visit_metric(&mut self, name: &str) {
            self.0 |= is_derived(name);
        }

        fn visit_tag(&mut self, _key: &str) {}

        fn visit_variable(&mut self, _name: &str) {}

        fn visit_scalar(&mut self, _value: &Expression) {}

        fn visit_list(&mut self, _values: &[Expression]) {}

        fn visit_function(&mut self, function: &crate::query::Function) {
            for param in &function.params {
                self.visit(param);
            }
        }

        fn visit_filter(&mut self, filter: &crate::query::Filter) {
            self.visit(&filter.inner);
        }
    }

    #[test]
    fn expands_nested_definitions_to_fixpoint() {
        let query = six_hour_query().expr(Expression::metric(CRASH_FREE));
        let expanded = expand(registry(), query).unwrap();

        let mut finder = DerivedFinder(false);
        finder.visit(&expanded.expressions[0]);
        assert!(!finder.0);
        assert!(expanded.metric_names().contains("c:sessions/session@none"));

        let again = expand(registry(), expanded.clone()).unwrap();
        assert_eq!(again, expanded);
    }

    #[test]
    fn raw_metrics_and_variables_are_untouched() {
        let query = six_hour_query()
            .expr(sessions())
            .expr(Expression::metric("$metric"));
        let expanded = expand(registry(), query.clone()).unwrap();
        assert_eq!(expanded, query);
    }

    #[test]
    fn unregistered_derived_metric_is_rejected() {
        let query = six_hour_query().expr(Expression::metric("e:sessions/unknown@none"));
        let err = expand(registry(), query).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn cyclic_definitions_fail_closed() {
        let registry = DerivedMetricRegistry::default()
            .with("e:custom/a@none", Expression::metric("e:custom/b@none"))
            .with("e:custom/b@none", Expression::metric("e:custom/a@none"));
        let query = six_hour_query().expr(Expression::metric("e:custom/a@none"));
        let err = expand(registry, query).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn registry_loads_from_json() {
        let registry = DerivedMetricRegistry::from_json(
            r#"{"e:custom/total@none": {"function": {"function": "sum", "params": [{"metric": "c:custom/hits@none"}]}}}"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("e:custom/total@none").is_some());
    }
}
