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

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::{
    error::QueryError,
    query::{GroupKey, SeriesQuery, SeriesResult},
};

use super::{
    CellValue, RawRow,
    translate::{BUCKET_ALIAS, parse_expression_alias},
};

struct ParsedRow {
    bucket: Option<i64>,
    group: GroupKey,
    values: Vec<(usize, f64)>,
}

fn parse_row(row: RawRow) -> ParsedRow {
    let mut bucket = None;
    let mut tags = Vec::new();
    let mut values = Vec::new();
    for (alias, cell) in row {
        if alias == BUCKET_ALIAS {
            bucket = cell.as_i64();
            continue;
        }
        let Some(index) = parse_expression_alias(&alias) else {
            tags.push((alias, cell.into_tag()));
            continue;
        };
        match cell.as_f64() {
            Some(value) if value.is_finite() => values.push((index, value)),
            Some(value) => warn!("dropping non-finite value {value} for expression {index}"),
            None => debug!("no value for expression {index}"),
        }
    }
    ParsedRow {
        bucket,
        group: GroupKey::new(tags),
        values,
    }
}

/// Folds bucketed rows and optional totals rows into a result shaped by
/// `query`.
pub(crate) fn convert_rows(
    query: &SeriesQuery,
    series: Vec<RawRow>,
    totals: Option<Vec<RawRow>>,
) -> Result<SeriesResult, QueryError> {
    let mut result = SeriesResult {
        start: query.range.start,
        end: query.range.end,
        interval: query.rollup.interval.unwrap_or(0),
        expression_count: query.expressions.len(),
        ..Default::default()
    };
    let mut intervals = BTreeSet::new();

    for row in series {
        let ParsedRow {
            bucket,
            group,
            values,
        } = parse_row(row);
        let bucket = bucket
            .ok_or_else(|| QueryError::Internal("series row is missing bucket column".into()))?;
        // Filters live inside the aggregates, so rows they exclude still come
        // back with every expression NULL.
        if values.is_empty() {
            continue;
        }
        intervals.insert(bucket);
        observe_tags(&mut result, &group);
        let series = result.groups.entry(group).or_default();
        for (index, value) in values {
            series.entry(index).or_default().insert(bucket, value);
        }
    }

    for row in totals.unwrap_or_default() {
        let ParsedRow { group, values, .. } = parse_row(row);
        if values.is_empty() {
            continue;
        }
        observe_tags(&mut result, &group);
        result.totals.entry(group).or_default().extend(values);
    }

    result.intervals = intervals.into_iter().collect();
    Ok(result)
}

fn observe_tags(result: &mut SeriesResult, group: &GroupKey) {
    for (key, value) in group.tags() {
        result
            .tags
            .entry(key.clone())
            .or_default()
            .insert(value.clone());
    }
}

impl CellValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(value) => Some(*value),
            CellValue::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            CellValue::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(value) => Some(*value as f64),
            CellValue::Float(value) => Some(*value),
            CellValue::String(text) => text.parse().ok(),
            CellValue::Null => None,
        }
    }

    /// Tag value as reported to callers; missing tags become empty strings.
    pub fn into_tag(self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Int(value) => value.to_string(),
            CellValue::Float(value) => value.to_string(),
            CellValue::String(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        query::{AggregationFn, Expression, Rollup},
        testing::{row, six_hour_query},
    };

    fn query() -> SeriesQuery {
        six_hour_query()
            .rollup(Rollup::with_interval(3600).totals(true))
            .expr(Expression::aggregate(
                AggregationFn::Sum,
                Expression::metric("c:custom/hits@none"),
            ))
            .expr(Expression::aggregate(
                AggregationFn::Sum,
                Expression::metric("c:custom/errors@none"),
            ))
            .group("env")
    }

    #[test]
    fn groups_rows_by_tags_and_bucket() {
        let start = six_hour_query().range.start.timestamp();
        let rows = vec![
            row([
                ("bucket", CellValue::Int(start)),
                ("env", CellValue::String("prod".into())),
                ("expr_0", CellValue::Float(3.0)),
                ("expr_1", CellValue::Null),
            ]),
            row([
                ("bucket", CellValue::Int(start + 7200)),
                ("env", CellValue::String("prod".into())),
                ("expr_0", CellValue::Int(5)),
                ("expr_1", CellValue::Float(f64::INFINITY)),
            ]),
            row([
                ("bucket", CellValue::Int(start)),
                ("env", CellValue::Null),
                ("expr_0", CellValue::Float(1.0)),
                ("expr_1", CellValue::Float(0.5)),
            ]),
        ];
        let totals = vec![row([
            ("env", CellValue::String("prod".into())),
            ("expr_0", CellValue::Float(8.0)),
            ("expr_1", CellValue::Float(0.0)),
        ])];
        let result = convert_rows(&query(), rows, Some(totals)).unwrap();

        let prod = GroupKey::new([("env", "prod")]);
        let missing = GroupKey::new([("env", "")]);
        assert_eq!(result.expression_count, 2);
        assert_eq!(result.intervals, vec![start, start + 7200]);
        assert_eq!(
            result.series(&prod, 0),
            vec![
                (start, Some(3.0)),
                (start + 3600, None),
                (start + 7200, Some(5.0)),
                (start + 10_800, None),
                (start + 14_400, None),
                (start + 18_000, None),
            ]
        );
        assert_eq!(result.value(&prod, 1, start), None);
        assert_eq!(result.value(&prod, 1, start + 7200), None);
        assert_eq!(result.value(&missing, 1, start), Some(0.5));
        assert_eq!(result.total(&prod, 0), Some(8.0));
        assert_eq!(
            result.tags["env"],
            BTreeSet::from(["".to_string(), "prod".to_string()])
        );
    }

    #[test]
    fn rows_without_values_leave_no_trace() {
        let start = six_hour_query().range.start.timestamp();
        let rows = vec![
            row([
                ("bucket", CellValue::Int(start)),
                ("env", CellValue::String("prod".into())),
                ("expr_0", CellValue::Int(2)),
                ("expr_1", CellValue::Null),
            ]),
            row([
                ("bucket", CellValue::Int(start + 3600)),
                ("env", CellValue::String("dev".into())),
                ("expr_0", CellValue::Null),
                ("expr_1", CellValue::Float(f64::NAN)),
            ]),
        ];
        let result = convert_rows(&query(), rows, None).unwrap();

        assert_eq!(result.intervals, vec![start]);
        assert_eq!(
            result.tags["env"],
            BTreeSet::from(["prod".to_string()])
        );
        assert!(!result.groups.contains_key(&GroupKey::new([("env", "dev")])));
        assert_eq!(result.to_response().groups.len(), 1);
    }

    #[test]
    fn series_rows_need_a_bucket() {
        let rows = vec![row([("expr_0", CellValue::Int(1))])];
        assert!(matches!(
            convert_rows(&query(), rows, None),
            Err(QueryError::Internal(_))
        ));
    }
}
