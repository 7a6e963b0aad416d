//! Query dispatch surface.
//!
//! # Responsibility
//! - Define the connector-side query capability bound to one model.
//! - Wrap it in a validating `QueryHandle` memoized per uid.
//!
//! # Invariants
//! - At most one `QueryHandle` exists per uid while the cache lives.
//! - Writes are validated against the model before reaching a connector.

mod cache;
mod handle;

pub use cache::QueryCache;
pub use handle::QueryHandle;

use crate::connector::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// One stored row: attribute name to JSON value, including `id`.
pub type Entry = serde_json::Map<String, Value>;

pub type QueryResult<T> = Result<T, QueryError>;

/// Connector capability bound to one model.
///
/// Connectors assign `id` and both timestamps on create, refresh the update
/// timestamp on update, and enforce the model's unique attributes.
#[async_trait]
pub trait ConnectorQuery: Send + Sync {
    async fn find(&self, filter: &Filter) -> ConnectorResult<Vec<Entry>>;
    async fn find_one(&self, id: i64) -> ConnectorResult<Option<Entry>>;
    async fn count(&self, filter: &Filter) -> ConnectorResult<u64>;
    async fn create(&self, values: Entry) -> ConnectorResult<Entry>;
    /// Merges `values` into the row. `None` when the row does not exist.
    async fn update(&self, id: i64, values: Entry) -> ConnectorResult<Option<Entry>>;
    async fn delete(&self, id: i64) -> ConnectorResult<Option<Entry>>;
}

/// Equality filter with paging, applied in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub equals: Entry,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.equals.insert(attribute.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// A `null` condition also matches rows lacking the attribute.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.equals.iter().all(|(attribute, expected)| {
            entry
                .get(attribute)
                .map_or(expected.is_null(), |value| value == expected)
        })
    }

    /// Filters rows already sorted by id, then pages them.
    pub fn apply(&self, entries: impl IntoIterator<Item = Entry>) -> Vec<Entry> {
        entries
            .into_iter()
            .filter(|entry| self.matches(entry))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Why one attribute of a write was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorReason {
    Unknown,
    Reserved,
    Required,
    TypeMismatch { expected: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub attribute: String,
    pub reason: FieldErrorReason,
}

impl FieldError {
    pub fn new(attribute: impl Into<String>, reason: FieldErrorReason) -> Self {
        Self {
            attribute: attribute.into(),
            reason,
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            FieldErrorReason::Unknown => write!(f, "`{}` is not an attribute", self.attribute),
            FieldErrorReason::Reserved => write!(f, "`{}` is managed by storage", self.attribute),
            FieldErrorReason::Required => write!(f, "`{}` must not be null", self.attribute),
            FieldErrorReason::TypeMismatch { expected } => {
                write!(f, "`{}` must be of type {expected}", self.attribute)
            }
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("ValidationError on `{uid}`: {}", join_errors(.errors))]
    Validation { uid: String, errors: Vec<FieldError> },
    #[error("ValidationError on `{uid}`: `{attribute}` must be unique")]
    UniqueViolation { uid: String, attribute: String },
    #[error("entry {id} of `{uid}` not found")]
    NotFound { uid: String, id: i64 },
    #[error("model `{0}` does not use draft and publish")]
    DraftAndPublishDisabled(String),
    #[error(transparent)]
    Connector(ConnectorError),
}

impl QueryError {
    /// Rejections caused by the written values, as opposed to storage failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UniqueViolation { .. })
    }

    /// Attributes named by a validation rejection.
    pub fn invalid_attributes(&self) -> Vec<&str> {
        match self {
            Self::Validation { errors, .. } => errors
                .iter()
                .map(|error| error.attribute.as_str())
                .collect(),
            Self::UniqueViolation { attribute, .. } => vec![attribute.as_str()],
            _ => Vec::new(),
        }
    }
}
