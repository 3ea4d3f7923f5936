use serde_json::Value;

use super::Row;

/// Equality filter applied after the row policy
///
/// A filter can only narrow what the policy already allows; filtering on
/// another tenant's id simply yields nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    #[must_use]
    pub const fn all() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
