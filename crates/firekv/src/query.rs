//! Structured query options.
//!
//! Mirrors the Realtime Database range-query grammar: `orderBy` plus
//! windowing (`startAt`/`startAfter`, `endAt`/`endBefore`), limits
//! (`limitToFirst`/`limitToLast`) and exact match (`equalTo`). Mutually
//! exclusive combinations are rejected when the querystring is built rather
//! than silently accepted.
//!
//! Per the REST interface, string and numeric parameter values must be
//! individually JSON-encoded in the querystring: ordering by key sends
//! `orderBy="$key"` (quotes included), `equalTo=active` is wrong and
//! `equalTo="active"` is right.

use serde_json::Value;

use crate::error::{FirekvError, FirekvResult};

/// Virtual field ordering children by key.
pub const ORDER_BY_KEY: &str = "$key";

/// Virtual field ordering children by their primitive value.
pub const ORDER_BY_VALUE: &str = "$value";

/// Options for a structured range query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    order_by: Option<String>,
    limit_to_first: Option<u32>,
    limit_to_last: Option<u32>,
    start_at: Option<Value>,
    start_after: Option<Value>,
    end_at: Option<Value>,
    end_before: Option<Value>,
    equal_to: Option<Value>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order results by a named child field.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Order results by key.
    pub fn order_by_key(self) -> Self {
        self.order_by(ORDER_BY_KEY)
    }

    /// Keep only the first `n` results in query order.
    pub fn limit_to_first(mut self, n: u32) -> Self {
        self.limit_to_first = Some(n);
        self
    }

    /// Keep only the last `n` results in query order.
    pub fn limit_to_last(mut self, n: u32) -> Self {
        self.limit_to_last = Some(n);
        self
    }

    /// Inclusive lower bound on the ordered value.
    pub fn start_at(mut self, value: impl Into<Value>) -> Self {
        self.start_at = Some(value.into());
        self
    }

    /// Exclusive lower bound on the ordered value.
    pub fn start_after(mut self, value: impl Into<Value>) -> Self {
        self.start_after = Some(value.into());
        self
    }

    /// Inclusive upper bound on the ordered value.
    pub fn end_at(mut self, value: impl Into<Value>) -> Self {
        self.end_at = Some(value.into());
        self
    }

    /// Exclusive upper bound on the ordered value.
    pub fn end_before(mut self, value: impl Into<Value>) -> Self {
        self.end_before = Some(value.into());
        self
    }

    /// Exact match on the ordered value.
    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    /// Field this query orders by, if any.
    pub fn order_by_field(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// Reject combinations the store treats as errors (or worse, resolves
    /// silently in surprising ways).
    fn validate(&self) -> FirekvResult<()> {
        if self.limit_to_first.is_some() && self.limit_to_last.is_some() {
            return Err(FirekvError::invalid_query(
                "limitToFirst and limitToLast cannot be combined",
            ));
        }
        if self.start_at.is_some() && self.start_after.is_some() {
            return Err(FirekvError::invalid_query(
                "startAt and startAfter cannot be combined",
            ));
        }
        if self.end_at.is_some() && self.end_before.is_some() {
            return Err(FirekvError::invalid_query(
                "endAt and endBefore cannot be combined",
            ));
        }
        let has_bounds = self.start_at.is_some()
            || self.start_after.is_some()
            || self.end_at.is_some()
            || self.end_before.is_some();
        if self.equal_to.is_some() && has_bounds {
            return Err(FirekvError::invalid_query(
                "equalTo cannot be combined with range bounds",
            ));
        }
        let has_filter = has_bounds
            || self.equal_to.is_some()
            || self.limit_to_first.is_some()
            || self.limit_to_last.is_some();
        if has_filter && self.order_by.is_none() {
            return Err(FirekvError::invalid_query(
                "filtering and limits require orderBy",
            ));
        }
        Ok(())
    }

    /// Build querystring pairs, with each value JSON-encoded.
    pub fn to_pairs(&self) -> FirekvResult<Vec<(&'static str, String)>> {
        self.validate()?;

        let mut pairs = Vec::new();
        if let Some(field) = &self.order_by {
            pairs.push(("orderBy", encode_value(&Value::String(field.clone()))?));
        }
        if let Some(v) = &self.start_at {
            pairs.push(("startAt", encode_value(v)?));
        }
        if let Some(v) = &self.start_after {
            pairs.push(("startAfter", encode_value(v)?));
        }
        if let Some(v) = &self.end_at {
            pairs.push(("endAt", encode_value(v)?));
        }
        if let Some(v) = &self.end_before {
            pairs.push(("endBefore", encode_value(v)?));
        }
        if let Some(v) = &self.equal_to {
            pairs.push(("equalTo", encode_value(v)?));
        }
        if let Some(n) = self.limit_to_first {
            pairs.push(("limitToFirst", n.to_string()));
        }
        if let Some(n) = self.limit_to_last {
            pairs.push(("limitToLast", n.to_string()));
        }
        Ok(pairs)
    }
}

/// JSON-encode a single query value per the REST convention.
fn encode_value(value: &Value) -> FirekvResult<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
            Ok(serde_json::to_string(value)?)
        }
        _ => Err(FirekvError::invalid_query(
            "query values must be strings, numbers, booleans or null",
        )),
    }
}
