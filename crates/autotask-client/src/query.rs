//! Autotask query filters and search parameters.
//!
//! Autotask's `query` endpoints take a JSON document in the `search` URL
//! parameter. Its `filter` array holds either conditions
//! (`{"field": .., "op": .., "value": ..}`) or groups
//! (`{"op": "and", "items": [..]}`) which may be nested.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

/// The comparison applied by a [`QueryFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOperator {
    /// `eq`
    #[serde(rename = "eq")]
    Equals,
    /// `noteq`
    #[serde(rename = "noteq")]
    NotEquals,
    /// `beginsWith`
    #[serde(rename = "beginsWith")]
    BeginsWith,
    /// `endsWith`
    #[serde(rename = "endsWith")]
    EndsWith,
    /// `contains`
    #[serde(rename = "contains")]
    Contains,
    /// `notContains`
    #[serde(rename = "notContains")]
    NotContains,
    /// `greaterThan`
    #[serde(rename = "greaterThan")]
    GreaterThan,
    /// `lessThan`
    #[serde(rename = "lessThan")]
    LessThan,
    /// `greaterOrEqual`
    #[serde(rename = "greaterOrEqual")]
    GreaterOrEqual,
    /// `lessOrEqual`
    #[serde(rename = "lessOrEqual")]
    LessOrEqual,
    /// `in`
    #[serde(rename = "in")]
    In,
    /// `notIn`
    #[serde(rename = "notIn")]
    NotIn,
    /// `isNull`
    #[serde(rename = "isNull")]
    IsNull,
    /// `isNotNull`
    #[serde(rename = "isNotNull")]
    IsNotNull,
    /// `gt`, the short form used in filter trees.
    #[serde(rename = "gt")]
    Gt,
    /// `gte`, the short form used in filter trees.
    #[serde(rename = "gte")]
    Gte,
    /// `lt`, the short form used in filter trees.
    #[serde(rename = "lt")]
    Lt,
    /// `lte`, the short form used in filter trees.
    #[serde(rename = "lte")]
    Lte,
}

/// A single field condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// The Autotask field name.
    pub field: String,
    /// The comparison.
    pub op: QueryOperator,
    /// The operand; absent for `isNull` and `isNotNull`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl QueryFilter {
    /// Create a condition comparing `field` against `value`.
    pub fn new(field: impl Into<String>, op: QueryOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: Some(value.into()),
        }
    }

    /// Create a condition without an operand, such as `isNull`.
    pub fn unary(field: impl Into<String>, op: QueryOperator) -> Self {
        Self {
            field: field.into(),
            op,
            value: None,
        }
    }
}

/// How the items of a [`Filter::Group`] are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    /// All items must match.
    And,
    /// At least one item must match.
    Or,
}

/// A node of an Autotask filter tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// A nested group of filters.
    Group {
        /// The combinator.
        op: GroupOperator,
        /// The grouped filters.
        items: Vec<Filter>,
    },
    /// A single condition.
    Condition(QueryFilter),
}

impl From<QueryFilter> for Filter {
    fn from(filter: QueryFilter) -> Self {
        Self::Condition(filter)
    }
}

impl Filter {
    /// Combine filters so that all of them must match.
    pub fn and(items: impl IntoIterator<Item = Filter>) -> Self {
        Self::Group {
            op: GroupOperator::And,
            items: items.into_iter().collect(),
        }
    }

    /// Combine filters so that any of them may match.
    pub fn or(items: impl IntoIterator<Item = Filter>) -> Self {
        Self::Group {
            op: GroupOperator::Or,
            items: items.into_iter().collect(),
        }
    }

    /// Parse a user-supplied filter expression.
    ///
    /// Accepts a JSON filter tree (an object, or an array whose items are
    /// and-ed together) or the `field=value` shorthand, where the value is
    /// interpreted as follows:
    ///
    /// - `true` / `false` compare as booleans with `eq`
    /// - `<n` compares numerically with `lessThan`
    /// - `>n` compares numerically with `greaterThan`
    /// - anything else compares as a string with `eq`
    ///
    /// Returns `Ok(None)` for a blank expression.
    pub fn parse(expr: &str) -> Result<Option<Self>> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(None);
        }
        if expr.starts_with('{') {
            return serde_json::from_str(expr)
                .map(Some)
                .map_err(|e| Error::InvalidFilter(format!("invalid filter JSON: {e}")));
        }
        if expr.starts_with('[') {
            let mut items: Vec<Filter> = serde_json::from_str(expr)
                .map_err(|e| Error::InvalidFilter(format!("invalid filter JSON: {e}")))?;
            return Ok(match items.len() {
                0 => None,
                1 => items.pop(),
                _ => Some(Self::and(items)),
            });
        }
        parse_shorthand(expr).map(|f| Some(f.into()))
    }
}

fn parse_shorthand(expr: &str) -> Result<QueryFilter> {
    let Some((field, value)) = expr.split_once('=') else {
        return Err(Error::InvalidFilter(format!(
            "expected `field=value`, got `{expr}`"
        )));
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(Error::InvalidFilter(format!("missing field name in `{expr}`")));
    }
    let value = value.trim();
    let filter = match value {
        "true" => QueryFilter::new(field, QueryOperator::Equals, true),
        "false" => QueryFilter::new(field, QueryOperator::Equals, false),
        _ => {
            if let Some(n) = value.strip_prefix('<') {
                QueryFilter::new(field, QueryOperator::LessThan, parse_number(field, n))
            } else if let Some(n) = value.strip_prefix('>') {
                QueryFilter::new(field, QueryOperator::GreaterThan, parse_number(field, n))
            } else {
                QueryFilter::new(field, QueryOperator::Equals, value)
            }
        }
    };
    Ok(filter)
}

/// Comparison operands that aren't integers compare against zero.
fn parse_number(field: &str, raw: &str) -> i64 {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(field, value = raw, "Non-numeric comparison value, comparing against 0");
        0
    })
}

/// The document sent in the `search` parameter of query endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQueryParams {
    /// Filters which must all match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Filter>,
    /// Restrict the returned fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// The page size, at most 500.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_records: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl EntityQueryParams {
    /// Create parameters with the given filters.
    pub fn new(filter: impl IntoIterator<Item = Filter>) -> Self {
        Self {
            filter: filter.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Only return the named fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the page size.
    pub fn with_max_records(mut self, max_records: u32) -> Self {
        self.max_records = max_records;
        self
    }

    /// Serialize to the JSON expected in the `search` parameter.
    pub fn to_search(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }
}
