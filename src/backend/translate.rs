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
    config::{QueryConfig, TagStorage},
    error::QueryError,
    indexer::Indexer,
    mri::{Entity, Mri},
    query::{AggregationFn, Condition, ConditionFn, Expression, FunctionName, SeriesQuery},
};

use super::sql::{escape, format_float_literal, literal, quote_ident, timestamp_literal};

pub const BUCKET_ALIAS: &str = "bucket";

const EXPRESSION_ALIAS_PREFIX: &str = "expr_";
const TIMESTAMP_COL: &str = "timestamp";
const VALUE_COL: &str = "value";
const ORG_COL: &str = "org_id";
const PROJECT_COL: &str = "project_id";
const METRIC_ID_COL: &str = "metric_id";
const METRIC_MRI_COL: &str = "metric_mri";
const TAGS_RAW_COL: &str = "tags_raw";
const TAGS_COL: &str = "tags";
const PROJECT_TAG: &str = "project";

pub(crate) fn expression_alias(index: usize) -> String {
    format!("{EXPRESSION_ALIAS_PREFIX}{index}")
}

pub(crate) fn parse_expression_alias(alias: &str) -> Option<usize> {
    alias.strip_prefix(EXPRESSION_ALIAS_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: String,
    pub alias: String,
}

/// One statement against a single entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalQuery {
    pub table: String,
    pub entity: Entity,
    pub granularity: u64,
    /// Bucket start expression; absent for totals.
    pub bucket: Option<String>,
    pub groups: Vec<SelectItem>,
    pub values: Vec<SelectItem>,
    pub predicates: Vec<String>,
}

impl PhysicalQuery {
    /// Output column names in select order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.bucket
            .as_ref()
            .map(|_| BUCKET_ALIAS)
            .into_iter()
            .chain(self.groups.iter().map(|item| item.alias.as_str()))
            .chain(self.values.iter().map(|item| item.alias.as_str()))
    }

    pub fn to_sql(&self) -> String {
        let bucket = self.bucket.as_ref().map(|expr| SelectItem {
            expr: expr.clone(),
            alias: BUCKET_ALIAS.to_string(),
        });
        let select = bucket
            .iter()
            .chain(&self.groups)
            .chain(&self.values)
            .map(|item| format!("{} AS {}", item.expr, quote_ident(&item.alias)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {select} FROM {table} WHERE {predicates}",
            table = self.table,
            predicates = self.predicates.join(" AND ")
        );
        let group_by: Vec<&str> = self
            .bucket
            .iter()
            .map(String::as_str)
            .chain(self.groups.iter().map(|item| item.expr.as_str()))
            .collect();
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if self.bucket.is_some() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&quote_ident(BUCKET_ALIAS));
        }
        sql
    }
}

/// Physical statements for one logical sub-query.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub series: PhysicalQuery,
    pub totals: Option<PhysicalQuery>,
}

impl TranslatedQuery {
    pub fn statements(&self) -> impl Iterator<Item = &PhysicalQuery> {
        std::iter::once(&self.series).chain(self.totals.as_ref())
    }
}

pub fn translate_query(
    query: &SeriesQuery,
    config: &QueryConfig,
    indexer: &dyn Indexer,
) -> Result<TranslatedQuery, QueryError> {
    let names: Vec<String> = query.metric_names().into_iter().collect();
    let mris = names
        .iter()
        .map(|name| Mri::parse(name))
        .collect::<Result<Vec<_>, _>>()?;
    let first = mris
        .first()
        .ok_or_else(|| QueryError::invalid("query does not reference any metric"))?;
    let use_case = first.use_case();
    let entity = first
        .entity()
        .ok_or_else(|| QueryError::invalid(format!("derived metric `{first}` was not expanded")))?;
    for mri in &mris {
        if mri.use_case() != use_case {
            return Err(QueryError::invalid(format!(
                "query mixes use cases `{use_case}` and `{}`",
                mri.use_case()
            )));
        }
        if mri.entity() != Some(entity) {
            return Err(QueryError::invalid(format!(
                "sub-query must reference a single entity, found `{first}` and `{mri}`"
            )));
        }
    }

    let settings = config.use_case(use_case)?;
    let interval = query
        .rollup
        .interval
        .filter(|interval| *interval > 0)
        .ok_or_else(|| QueryError::invalid("rollup interval is not resolved"))?;
    let granularity = settings.granularity_for(interval).ok_or_else(|| {
        QueryError::invalid(format!(
            "interval {interval}s is not a multiple of any granularity of `{use_case}`"
        ))
    })?;
    if query.scope.project_ids.is_empty() {
        return Err(QueryError::invalid("scope must include at least one project"));
    }

    let columns = Columns {
        use_case,
        storage: settings.tag_storage,
        indexer,
    };
    let table_name = settings.tables.table(entity);
    let table = match &settings.database {
        Some(database) => format!("{}.{}", quote_ident(database), quote_ident(table_name)),
        None => quote_ident(table_name),
    };

    let timestamp = quote_ident(TIMESTAMP_COL);
    let mut predicates = vec![
        format!("{} = {}", quote_ident(ORG_COL), query.scope.org_id),
        format!(
            "{} IN ({})",
            quote_ident(PROJECT_COL),
            join(query.scope.project_ids.iter().map(u64::to_string))
        ),
        format!("{timestamp} >= {}", timestamp_literal(query.range.start)),
        format!("{timestamp} < {}", timestamp_literal(query.range.end)),
        columns.metric_prefilter(&names)?,
    ];
    if let Some(column) = &settings.granularity_column {
        predicates.push(format!("{} = {granularity}", quote_ident(column)));
    }
    for condition in &query.filters {
        predicates.push(columns.condition(condition)?);
    }

    let mut groups = Vec::with_capacity(query.groups.len());
    for tag in &query.groups {
        if tag == BUCKET_ALIAS || parse_expression_alias(tag).is_some() {
            return Err(QueryError::invalid(format!(
                "cannot group by `{tag}`: the name is reserved"
            )));
        }
        groups.push(SelectItem {
            expr: columns.tag(tag)?,
            alias: tag.clone(),
        });
    }
    let mut values = Vec::with_capacity(query.expressions.len());
    for (index, expr) in query.expressions.iter().enumerate() {
        values.push(SelectItem {
            expr: columns.expression(expr)?,
            alias: expression_alias(index),
        });
    }

    let series = PhysicalQuery {
        table,
        entity,
        granularity,
        bucket: Some(format!(
            "(to_unix_timestamp({timestamp}) DIV {interval}) * {interval}"
        )),
        groups,
        values,
        predicates,
    };
    let totals = query.rollup.totals.then(|| PhysicalQuery {
        bucket: None,
        ..series.clone()
    });
    Ok(TranslatedQuery { series, totals })
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

/// Column expressions for one use case's storage layout.
struct Columns<'a> {
    use_case: &'a str,
    storage: TagStorage,
    indexer: &'a dyn Indexer,
}

impl Columns<'_> {
    fn resolve(&self, kind: &str, name: &str) -> Result<u64, QueryError> {
        self.indexer.resolve(self.use_case, name).ok_or_else(|| {
            QueryError::invalid(format!(
                "{kind} `{name}` is not indexed for use case `{}`",
                self.use_case
            ))
        })
    }

    fn tag(&self, key: &str) -> Result<String, QueryError> {
        if key == PROJECT_TAG {
            return Ok(quote_ident(PROJECT_COL));
        }
        match self.storage {
            TagStorage::Indexed => {
                let id = self.resolve("tag", key)?;
                Ok(format!("{}['{id}']", quote_ident(TAGS_RAW_COL)))
            }
            TagStorage::Raw => Ok(format!("{}['{}']", quote_ident(TAGS_COL), escape(key))),
        }
    }

    fn metric(&self, mri: &str) -> Result<String, QueryError> {
        match self.storage {
            TagStorage::Indexed => Ok(format!(
                "{} = {}",
                quote_ident(METRIC_ID_COL),
                self.resolve("metric", mri)?
            )),
            TagStorage::Raw => Ok(format!(
                "{} = '{}'",
                quote_ident(METRIC_MRI_COL),
                escape(mri)
            )),
        }
    }

    fn metric_prefilter(&self, names: &[String]) -> Result<String, QueryError> {
        match self.storage {
            TagStorage::Indexed => {
                let ids = names
                    .iter()
                    .map(|name| self.resolve("metric", name).map(|id| id.to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{} IN ({})", quote_ident(METRIC_ID_COL), ids.join(", ")))
            }
            TagStorage::Raw => Ok(format!(
                "{} IN ({})",
                quote_ident(METRIC_MRI_COL),
                join(names.iter().map(|name| format!("'{}'", escape(name))))
            )),
        }
    }

    fn condition(&self, condition: &Condition) -> Result<String, QueryError> {
        let Expression::Tag(key) = &condition.lhs else {
            return Err(QueryError::invalid(format!(
                "condition `{condition}` must compare a tag"
            )));
        };
        let column = self.tag(key)?;
        let operator = match condition.op {
            ConditionFn::Equals => "=",
            ConditionFn::NotEquals => "!=",
            ConditionFn::Like => "LIKE",
            ConditionFn::NotLike => "NOT LIKE",
            ConditionFn::In | ConditionFn::NotIn => {
                let Expression::List(values) = &condition.rhs else {
                    return Err(QueryError::invalid(format!(
                        "condition `{condition}` expects a list of values"
                    )));
                };
                let items = values.iter().map(literal).collect::<Result<Vec<_>, _>>()?;
                let negate = if condition.op == ConditionFn::NotIn {
                    "NOT "
                } else {
                    ""
                };
                return Ok(format!("{column} {negate}IN ({})", items.join(", ")));
            }
        };
        Ok(format!("{column} {operator} {}", literal(&condition.rhs)?))
    }

    fn expression(&self, expr: &Expression) -> Result<String, QueryError> {
        match expr {
            Expression::Function(function) => match (function.function, function.params.as_slice()) {
                (FunctionName::Aggregation(aggregation), [param]) => {
                    let (name, conditions) = match param {
                        Expression::Metric(name) => (name, &[][..]),
                        Expression::Filter(filter) => match filter.inner.as_ref() {
                            Expression::Metric(name) => (name, filter.conditions.as_slice()),
                            other => return Err(untranslatable(other)),
                        },
                        other => return Err(untranslatable(other)),
                    };
                    self.aggregate(aggregation, name, conditions)
                }
                (FunctionName::Arithmetic(arithmetic), [lhs, rhs]) => Ok(format!(
                    "({}) {} ({})",
                    self.expression(lhs)?,
                    arithmetic.operator(),
                    self.expression(rhs)?
                )),
                _ => Err(untranslatable(expr)),
            },
            other => Err(untranslatable(other)),
        }
    }

    fn aggregate(
        &self,
        aggregation: AggregationFn,
        mri: &str,
        conditions: &[Condition],
    ) -> Result<String, QueryError> {
        let mut predicates = vec![self.metric(mri)?];
        for condition in conditions {
            predicates.push(self.condition(condition)?);
        }
        let predicate = predicates.join(" AND ");
        let value = quote_ident(VALUE_COL);
        Ok(match aggregation {
            AggregationFn::Sum => format!("sum_if({value}, {predicate})"),
            AggregationFn::Count => format!("count_if({predicate})"),
            AggregationFn::Avg => format!("avg_if({value}, {predicate})"),
            AggregationFn::Max => format!("max_if({value}, {predicate})"),
            AggregationFn::Min => format!("min_if({value}, {predicate})"),
            AggregationFn::P50 | AggregationFn::P75 | AggregationFn::P95 | AggregationFn::P99 => {
                let level = aggregation.quantile().unwrap_or(0.5);
                format!(
                    "quantile_cont_if({})({value}, {predicate})",
                    format_float_literal(level)
                )
            }
            AggregationFn::CountUnique => format!("uniq_if({value}, {predicate})"),
            AggregationFn::Last => format!(
                "arg_max_if({value}, {}, {predicate})",
                quote_ident(TIMESTAMP_COL)
            ),
        })
    }
}

fn untranslatable(expr: &Expression) -> QueryError {
    QueryError::invalid(format!("`{expr}` cannot be translated to SQL"))
}
