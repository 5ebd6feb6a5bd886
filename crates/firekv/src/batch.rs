//! Concurrent fan-out of heterogeneous write operations.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::RtdbClient;
use crate::error::FirekvResult;

/// A single write in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Overwrite the subtree at `path`.
    Set { path: String, value: Value },
    /// Merge top-level fields into the subtree at `path`.
    Update { path: String, value: Value },
    /// Remove the subtree at `path`.
    Delete { path: String },
}

impl WriteOp {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn update(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Update {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// Target path of this operation.
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

impl RtdbClient {
    /// Dispatch a list of writes concurrently.
    ///
    /// All operations are initiated in list order and run concurrently; the
    /// call resolves once every one has settled, then surfaces the first
    /// failure in initiation order. Not atomic: writes that completed before
    /// a failure stay applied and are not rolled back.
    pub async fn batch(&self, operations: Vec<WriteOp>) -> FirekvResult<()> {
        let tasks = operations.into_iter().map(|op| async move {
            match op {
                WriteOp::Set { path, value } => self.set(&path, &value).await,
                WriteOp::Update { path, value } => self.update(&path, &value).await,
                WriteOp::Delete { path } => self.delete(&path).await,
            }
        });

        let results = join_all(tasks).await;
        let total = results.len();
        for result in results {
            result?;
        }

        debug!("Batch of {} write operations completed", total);
        Ok(())
    }
}
