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

use databend_driver::{Client, NumberValue, Row, Value};
use futures::future::try_join_all;
use log::{debug, info, warn};

use crate::error::QueryError;

use super::{CellValue, Executor, PhysicalQuery, RawRow};

async fn execute_query(client: &Client, sql: &str) -> Result<Vec<Row>, QueryError> {
    let conn = client.get_conn().await?;
    conn.set_session("timezone", "UTC")?;
    let rows = conn.query_all(sql).await?;
    Ok(rows)
}

/// Executes statements concurrently over a Databend connection pool.
#[derive(Clone)]
pub struct DatabendExecutor {
    client: Client,
}

impl DatabendExecutor {
    pub fn new(dsn: &str) -> Self {
        Self {
            client: Client::new(dsn.to_string()),
        }
    }

    pub async fn verify_connection(&self) -> Result<(), QueryError> {
        let conn = self.client.get_conn().await?;
        conn.set_session("timezone", "UTC")?;
        let info = conn.info().await;
        info!("connected to Databend {}:{}", info.host, info.port);
        match conn.version().await {
            Ok(version) => info!("server version {version}"),
            Err(err) => warn!("server version unavailable: {err}"),
        }
        let _ = conn.close().await;
        Ok(())
    }

    async fn run(&self, query: &PhysicalQuery) -> Result<Vec<RawRow>, QueryError> {
        let sql = query.to_sql();
        debug!("executing SQL: {sql}");
        let rows = execute_query(&self.client, &sql).await?;
        let aliases: Vec<&str> = query.aliases().collect();
        rows.iter()
            .map(|row| {
                let values = row.values();
                if values.len() != aliases.len() {
                    return Err(QueryError::Internal(format!(
                        "expected {} columns, row has {}",
                        aliases.len(),
                        values.len()
                    )));
                }
                Ok(aliases
                    .iter()
                    .zip(values)
                    .map(|(alias, value)| (alias.to_string(), cell_value(value)))
                    .collect())
            })
            .collect()
    }
}

impl Executor for DatabendExecutor {
    async fn execute(&self, queries: &[PhysicalQuery]) -> Result<Vec<Vec<RawRow>>, QueryError> {
        try_join_all(queries.iter().map(|query| self.run(query))).await
    }
}

fn cell_value(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Boolean(flag) => CellValue::Int(i64::from(*flag)),
        Value::String(text) | Value::Variant(text) => CellValue::String(text.clone()),
        Value::Number(num) => number_cell(num),
        other => CellValue::String(other.to_string()),
    }
}

fn number_cell(num: &NumberValue) -> CellValue {
    match num {
        NumberValue::Int8(v) => CellValue::Int(i64::from(*v)),
        NumberValue::Int16(v) => CellValue::Int(i64::from(*v)),
        NumberValue::Int32(v) => CellValue::Int(i64::from(*v)),
        NumberValue::Int64(v) => CellValue::Int(*v),
        NumberValue::UInt8(v) => CellValue::Int(i64::from(*v)),
        NumberValue::UInt16(v) => CellValue::Int(i64::from(*v)),
        NumberValue::UInt32(v) => CellValue::Int(i64::from(*v)),
        NumberValue::UInt64(v) => match i64::try_from(*v) {
            Ok(v) => CellValue::Int(v),
            Err(_) => CellValue::Float(*v as f64),
        },
        NumberValue::Float32(v) => CellValue::Float(f64::from(*v)),
        NumberValue::Float64(v) => CellValue::Float(*v),
        NumberValue::Decimal64(v, size) => {
            CellValue::Float(*v as f64 / 10_f64.powi(size.scale as i32))
        }
        NumberValue::Decimal128(v, size) => {
            CellValue::Float(*v as f64 / 10_f64.powi(size.scale as i32))
        }
        NumberValue::Decimal256(_, _) => num
            .to_string()
            .parse()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
    }
}
