//! Document model and write patches.
//!
//! Documents are flat maps of field names to JSON values. Writes are
//! expressed as a [`Patch`]: a set of field writes where each value is either
//! a literal or a sentinel resolved by the store at write time (atomic
//! increments, server timestamps, field deletion).

use exn::ResultExt;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{ErrorKind, Result};
use crate::path::DocumentPath;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// A stored document as returned by [`DocumentStore::get`](crate::DocumentStore::get).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
    /// Time of the last write to this document
    pub updated: OffsetDateTime,
}
impl Document {
    pub fn new(path: DocumentPath, fields: Fields, updated: OffsetDateTime) -> Self {
        Self { path, fields, updated }
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Value written to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Literal JSON value.
    Value(Value),
    /// Atomically add to the current value. Missing or non-numeric fields
    /// count as zero.
    Increment(i64),
    /// Replaced by the store's clock at write time (RFC 3339, UTC).
    ServerTimestamp,
    /// Remove the field.
    Delete,
}

/// A set of field writes applied as one atomic write.
///
/// # Examples
///
/// ```
/// use booktally_store::{FieldValue, Patch};
///
/// let patch = Patch::new()
///     .set("bookId", "b7")
///     .server_timestamp("downloadedAt")
///     .increment("downloads", 1);
/// assert_eq!(patch.len(), 3);
/// assert_eq!(patch.get("downloads"), Some(&FieldValue::Increment(1)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, FieldValue>,
}
impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldValue::Value(value.into()))
    }

    pub fn increment(self, field: impl Into<String>, by: i64) -> Self {
        self.with(field, FieldValue::Increment(by))
    }

    pub fn server_timestamp(self, field: impl Into<String>) -> Self {
        self.with(field, FieldValue::ServerTimestamp)
    }

    pub fn delete(self, field: impl Into<String>) -> Self {
        self.with(field, FieldValue::Delete)
    }

    /// Add a field write. A later write to the same field replaces the earlier one.
    pub fn with(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply every field write onto `fields`, resolving sentinels against `now`.
    pub fn apply(&self, fields: &mut Fields, now: OffsetDateTime) -> Result<()> {
        for (field, value) in &self.fields {
            match value {
                FieldValue::Value(value) => {
                    fields.insert(field.clone(), value.clone());
                },
                FieldValue::Increment(by) => {
                    let next = increment(fields.get(field), *by);
                    fields.insert(field.clone(), next);
                },
                FieldValue::ServerTimestamp => {
                    fields.insert(field.clone(), Value::String(timestamp(now)?));
                },
                FieldValue::Delete => {
                    fields.remove(field);
                },
            }
        }
        Ok(())
    }
}

/// Add `by` to a stored JSON value.
///
/// Integers saturate instead of overflowing, floats stay floats, and anything
/// that isn't a number is treated as zero.
pub fn increment(current: Option<&Value>, by: i64) -> Value {
    let Some(Value::Number(number)) = current else {
        return Value::from(by);
    };
    if let Some(int) = number.as_i64() {
        return Value::from(int.saturating_add(by));
    }
    if let Some(uint) = number.as_u64() {
        // Only reachable above i64::MAX.
        return match by >= 0 {
            true => Value::from(uint.saturating_add(by.unsigned_abs())),
            false => Value::from(uint.saturating_sub(by.unsigned_abs())),
        };
    }
    number
        .as_f64()
        .and_then(|float| Number::from_f64(float + by as f64))
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(by))
}

/// Format a timestamp the way it is stored in documents.
pub fn timestamp(at: OffsetDateTime) -> Result<String> {
    at.format(&Rfc3339)
        .or_raise(|| ErrorKind::BackendError(format!("timestamp out of range: {at}")))
}

/// Parse a timestamp previously written by [`timestamp`].
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}
