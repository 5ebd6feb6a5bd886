//! Read-modify-write helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client::RtdbClient;
use crate::error::{FirekvError, FirekvResult};

impl RtdbClient {
    /// Read the value at `path`, apply `apply`, and write the result back.
    ///
    /// NOT atomic: the read and the write are two independent requests, so a
    /// concurrent writer between them is silently overwritten (lost update).
    /// Use [`transact_conditional`](Self::transact_conditional) when that
    /// race matters.
    pub async fn transact<T, F>(&self, path: &str, apply: F) -> FirekvResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.get::<T>(path).await?;
        let next = apply(current);
        self.set(path, &next).await?;
        Ok(next)
    }

    /// Read-modify-write guarded by the store's ETag primitive.
    ///
    /// The write only lands if nothing else modified `path` since the read;
    /// otherwise the call fails with [`FirekvError::PreconditionFailed`] and
    /// the caller decides whether to rerun. One attempt, no internal retry.
    pub async fn transact_conditional<T, F>(&self, path: &str, apply: F) -> FirekvResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let (current, etag) = self.get_with_etag::<T>(path).await?;
        let next = apply(current);
        self.set_if_match(path, &next, &etag).await?;
        Ok(next)
    }

    /// Add `delta` to the number at `path` and return the new value.
    ///
    /// An absent path counts from zero. One read plus one write, with the
    /// same lost-update race as [`transact`](Self::transact).
    pub async fn increment(&self, path: &str, delta: f64) -> FirekvResult<f64> {
        let current: Option<Value> = self.get(path).await?;
        let base = match current {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                FirekvError::request_failed(format!("{} holds a non-finite number", path))
            })?,
            Some(other) => {
                return Err(FirekvError::request_failed(format!(
                    "{} holds non-numeric data: {}",
                    path, other
                )))
            }
        };

        let next = base + delta;
        self.set(path, &next).await?;
        Ok(next)
    }
}
