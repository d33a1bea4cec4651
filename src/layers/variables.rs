use std::collections::BTreeMap;

use crate::{
    error::QueryError,
    query::{Expression, SeriesQuery, Transform},
};

struct VariableBinder<'a> {
    bindings: &'a BTreeMap<String, Expression>,
}

impl Transform for VariableBinder<'_> {
    fn transform_variable(&mut self, name: String) -> Result<Expression, QueryError> {
        Ok(self
            .bindings
            .get(&name)
            .cloned()
            .unwrap_or(Expression::Variable(name)))
    }
}

impl SeriesQuery {
    /// Substitutes `$name` placeholders. Unbound ones are left in place and
    /// rejected by validation.
    pub fn bind_variables(
        self,
        bindings: &BTreeMap<String, Expression>,
    ) -> Result<SeriesQuery, QueryError> {
        VariableBinder { bindings }.transform_query(self)
    }
}
