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

use chrono::{DateTime, Utc};

use crate::{error::QueryError, query::Expression};

pub(crate) fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub(crate) fn timestamp_literal(datetime: DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", datetime.format("%Y-%m-%d %H:%M:%S%.f"))
}

pub(crate) fn format_float_literal(value: f64) -> String {
    let mut text = format!("{value:.9}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text.is_empty() || text == "-0" {
        "0".into()
    } else {
        text
    }
}

/// Renders a literal condition operand.
pub(crate) fn literal(value: &Expression) -> Result<String, QueryError> {
    match value {
        Expression::Str(text) => Ok(format!("'{}'", escape(text))),
        Expression::Int(number) => Ok(number.to_string()),
        Expression::Float(number) if number.is_finite() => Ok(format_float_literal(*number)),
        other => Err(QueryError::invalid(format!(
            "`{other}` cannot be used as a literal"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn quotes_and_escapes() {
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
        assert_eq!(literal(&Expression::string("it's")).unwrap(), "'it''s'");
        assert_eq!(literal(&Expression::Int(-3)).unwrap(), "-3");
        assert!(literal(&Expression::tag("env")).is_err());
        assert!(literal(&Expression::Float(f64::NAN)).is_err());
    }

    #[test]
    fn trims_float_literals() {
        assert_eq!(format_float_literal(0.5), "0.5");
        assert_eq!(format_float_literal(2.0), "2");
        assert_eq!(format_float_literal(0.99), "0.99");
    }

    #[test]
    fn renders_timestamps_in_utc() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        assert_eq!(timestamp_literal(at), "TIMESTAMP '2024-01-01 06:00:00'");
    }
}
