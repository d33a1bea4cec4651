use databend_driver::Error as DatabendError;
use thiserror::Error;

use crate::mri::MriError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid metrics query: {0}")]
    InvalidMetricsQuery(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Databend(#[from] DatabendError),
    #[error("{0}")]
    Internal(String),
}

impl QueryError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMetricsQuery(reason.into())
    }

    pub fn is_invalid_query(&self) -> bool {
        matches!(self, Self::InvalidMetricsQuery(_))
    }
}

impl From<MriError> for QueryError {
    fn from(err: MriError) -> Self {
        Self::InvalidMetricsQuery(err.to_string())
    }
}
