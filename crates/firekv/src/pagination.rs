//! Cursor-based pagination and derived query helpers.
//!
//! Built entirely on the structured key-ordered query: a page fetches
//! `page_size + 1` items (the overshoot detects a further page without a
//! count query) windowed by an exclusive cursor, in either direction.
//! Cursors are node keys and are only meaningful for the same direction and
//! ordering they were produced under.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::RtdbClient;
use crate::error::{FirekvError, FirekvResult};
use crate::query::{QueryOptions, ORDER_BY_KEY, ORDER_BY_VALUE};

// =============================================================================
// Page
// =============================================================================

/// One page of key-ordered results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Entries in the requested direction's order.
    pub items: Vec<(String, T)>,
    /// Cursor resuming iteration after this page, `None` on an empty page.
    pub next_cursor: Option<String>,
    /// Cursor of this page's first entry, `None` on an empty page.
    pub prev_cursor: Option<String>,
    /// Whether more data exists beyond this page in the requested direction.
    pub has_more: bool,
    /// Total child count of the whole node, when requested. Counts the full
    /// node, not a filtered view.
    pub total: Option<usize>,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of this page's entries, in page order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(key, _)| key.as_str())
    }
}

// =============================================================================
// Value ordering
// =============================================================================

static NULL: Value = Value::Null;

/// Type rank in the store's ordering: null < false < true < numbers < strings
/// < objects.
fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        _ => 5,
    }
}

/// Compare two values the way the store orders them.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (rank_a, rank_b) = (value_rank(a), value_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// The value a query's `orderBy` field selects out of a child entry.
fn ordered_field<'a>(entry: &'a Value, field: &str) -> &'a Value {
    match field {
        ORDER_BY_VALUE => entry,
        // Key ordering is positional, not value-based.
        ORDER_BY_KEY => &NULL,
        _ => entry.get(field).unwrap_or(&NULL),
    }
}

/// Sort entries ascending by ordered field, key as tie-breaker.
///
/// The REST interface returns a JSON object, whose member order cannot be
/// trusted to carry the query order for non-key orderings, so helpers
/// re-establish it client-side.
fn sort_by_field(entries: BTreeMap<String, Value>, field: &str) -> Vec<(String, Value)> {
    let mut entries: Vec<(String, Value)> = entries.into_iter().collect();
    entries.sort_by(|(key_a, value_a), (key_b, value_b)| {
        compare_values(ordered_field(value_a, field), ordered_field(value_b, field))
            .then_with(|| key_a.cmp(key_b))
    });
    entries
}

fn convert_entries<T>(entries: Vec<(String, Value)>) -> FirekvResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
{
    entries
        .into_iter()
        .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
        .collect()
}

// =============================================================================
// Pagination engine
// =============================================================================

impl RtdbClient {
    /// Fetch one key-ordered page.
    ///
    /// Forward (`reverse = false`) walks ascending key order and resumes
    /// strictly after `cursor`; reverse walks most-recent-first and resumes
    /// strictly before it. Following `next_cursor` until `has_more` is false
    /// enumerates every child exactly once.
    pub async fn paginate<T>(
        &self,
        path: &str,
        page_size: usize,
        cursor: Option<&str>,
        reverse: bool,
    ) -> FirekvResult<Page<T>>
    where
        T: DeserializeOwned,
    {
        if page_size == 0 {
            return Err(FirekvError::invalid_query("page size must be at least 1"));
        }

        // One extra item detects a further page without a count query.
        let window = (page_size + 1) as u32;
        let mut options = QueryOptions::new().order_by_key();
        options = if reverse {
            options.limit_to_last(window)
        } else {
            options.limit_to_first(window)
        };
        if let Some(cursor) = cursor {
            options = if reverse {
                options.end_before(cursor)
            } else {
                options.start_after(cursor)
            };
        }

        let entries = self.query::<T>(path, &options).await?;
        let mut entries: Vec<(String, T)> = entries.into_iter().collect();
        if reverse {
            // The store returns ascending key order even for limitToLast.
            entries.reverse();
        }

        let has_more = entries.len() > page_size;
        entries.truncate(page_size);

        let prev_cursor = entries.first().map(|(key, _)| key.clone());
        let next_cursor = entries.last().map(|(key, _)| key.clone());

        Ok(Page {
            items: entries,
            next_cursor,
            prev_cursor,
            has_more,
            total: None,
        })
    }

    /// [`paginate`](Self::paginate) plus a concurrent total count of the node.
    pub async fn paginate_with_count<T>(
        &self,
        path: &str,
        page_size: usize,
        cursor: Option<&str>,
        reverse: bool,
    ) -> FirekvResult<Page<T>>
    where
        T: DeserializeOwned,
    {
        let (page, total) = tokio::join!(
            self.paginate::<T>(path, page_size, cursor, reverse),
            self.count(path)
        );

        let mut page = page?;
        page.total = Some(total?);
        Ok(page)
    }

    // =========================================================================
    // Derived query helpers
    // =========================================================================

    /// The `n` entries with the largest `field` values, descending.
    ///
    /// One-shot: the whole result is materialized, so `n` bounds the fetch.
    pub async fn top<T>(&self, path: &str, n: u32, field: &str) -> FirekvResult<Vec<(String, T)>>
    where
        T: DeserializeOwned,
    {
        let options = QueryOptions::new().order_by(field).limit_to_last(n);
        let entries = self.query::<Value>(path, &options).await?;
        let mut entries = sort_by_field(entries, field);
        entries.reverse();
        convert_entries(entries)
    }

    /// The `n` entries with the smallest `field` values, ascending.
    pub async fn bottom<T>(&self, path: &str, n: u32, field: &str) -> FirekvResult<Vec<(String, T)>>
    where
        T: DeserializeOwned,
    {
        let options = QueryOptions::new().order_by(field).limit_to_first(n);
        let entries = self.query::<Value>(path, &options).await?;
        convert_entries(sort_by_field(entries, field))
    }

    /// All entries whose `field` equals `value`, in key order.
    ///
    /// Unbounded; keeping the match cardinality sane (indexing on `field`) is
    /// the caller's responsibility.
    pub async fn find_by_value<T>(
        &self,
        path: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> FirekvResult<Vec<(String, T)>>
    where
        T: DeserializeOwned,
    {
        let options = QueryOptions::new().order_by(field).equal_to(value);
        let entries = self.query::<Value>(path, &options).await?;
        convert_entries(entries.into_iter().collect())
    }

    /// All entries whose `field` lies in `[start, end]`, ascending by `field`.
    pub async fn range<T>(
        &self,
        path: &str,
        field: &str,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> FirekvResult<Vec<(String, T)>>
    where
        T: DeserializeOwned,
    {
        let options = QueryOptions::new()
            .order_by(field)
            .start_at(start)
            .end_at(end);
        let entries = self.query::<Value>(path, &options).await?;
        convert_entries(sort_by_field(entries, field))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_ordering_across_types() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-3),
            json!(2.5),
            json!("apple"),
            json!("banana"),
            json!({"nested": 1}),
        ];
        for window in ordered.windows(2) {
            assert_ne!(
                compare_values(&window[0], &window[1]),
                Ordering::Greater,
                "{:?} should not sort after {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_sort_by_field_orders_ascending_with_key_tiebreak() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), json!({"score": 30}));
        entries.insert("b".to_string(), json!({"score": 10}));
        entries.insert("c".to_string(), json!({"score": 30}));
        entries.insert("d".to_string(), json!({"score": 20}));

        let sorted = sort_by_field(entries, "score");
        let keys: Vec<&str> = sorted.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_sort_by_field_missing_field_sorts_first() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), json!({"score": 1}));
        entries.insert("b".to_string(), json!({"other": true}));

        let sorted = sort_by_field(entries, "score");
        assert_eq!(sorted[0].0, "b");
    }

    #[test]
    fn test_sort_by_value_ordering() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), json!(12));
        entries.insert("b".to_string(), json!(3));
        entries.insert("c".to_string(), json!("text"));

        let sorted = sort_by_field(entries, ORDER_BY_VALUE);
        let keys: Vec<&str> = sorted.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
