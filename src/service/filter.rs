//! Compound filters
//!
//! Boolean combinations of exact-match conditions over the two indexed
//! fields. The query engine only ever builds a disjunction of
//! `(PartitionKey eq p) and (RowKey eq r)` conjunctions, but the type
//! allows any nesting.

use std::fmt;

/// The indexed fields a filter may test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    PartitionKey,
    RowKey,
}

impl FilterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::PartitionKey => "PartitionKey",
            FilterField::RowKey => "RowKey",
        }
    }
}

/// A backend predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `field eq 'value'`
    Eq { field: FilterField, value: String },

    /// Both sides must hold
    And(Box<Filter>, Box<Filter>),

    /// Any side may hold
    Or(Vec<Filter>),
}

impl Filter {
    /// Exact-match condition
    pub fn eq(field: FilterField, value: impl Into<String>) -> Self {
        Filter::Eq {
            field,
            value: value.into(),
        }
    }

    /// Conjunction of two filters
    pub fn and(left: Filter, right: Filter) -> Self {
        Filter::And(Box::new(left), Box::new(right))
    }

    /// Exact (partition, row) target
    pub fn target(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Filter::and(
            Filter::eq(FilterField::PartitionKey, partition_key),
            Filter::eq(FilterField::RowKey, row_key),
        )
    }

    /// Evaluate the filter against a row's indexed fields
    pub fn matches(&self, partition_key: &str, row_key: &str) -> bool {
        match self {
            Filter::Eq { field, value } => match field {
                FilterField::PartitionKey => value == partition_key,
                FilterField::RowKey => value == row_key,
            },
            Filter::And(left, right) => {
                left.matches(partition_key, row_key) && right.matches(partition_key, row_key)
            }
            Filter::Or(branches) => branches.iter().any(|b| b.matches(partition_key, row_key)),
        }
    }

    /// Number of top-level disjuncts (targets) in the filter
    pub fn target_count(&self) -> usize {
        match self {
            Filter::Or(branches) => branches.len(),
            _ => 1,
        }
    }

    /// True for a disjunction with no branches (matches nothing)
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Or(branches) if branches.is_empty())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq { field, value } => {
                write!(f, "{} eq '{}'", field.as_str(), value.replace('\'', "''"))
            }
            Filter::And(left, right) => write!(f, "({}) and ({})", left, right),
            Filter::Or(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "({})", branch)?;
                }
                Ok(())
            }
        }
    }
}
