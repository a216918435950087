//! Per-run state threaded through every step of one scenario execution.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::InstanceId;
use crate::bridge::HostBridge;
use crate::error::{PipelineError, Result};
use crate::logging::RunLog;

/// Opaque handle naming where host-bridge operations apply (a tab, a page session).
/// Borrowed from the host; the engine never closes or mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetHandle(String);

impl TargetHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Caller-supplied input parameters, read-only once the run starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Free-form results slot. Values are stored as JSON so that late observers
/// (status queries, the control surface) can inspect them without knowing
/// the step types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Results(Map<String, Value>);

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Typed read; `Ok(None)` when the key was never written.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// Typed read of an input an earlier step must have produced.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?.ok_or_else(|| {
            PipelineError::Precondition(format!("Missing '{}' from an earlier step", key))
        })
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cooperative cancellation check. Requesting cancellation only sets a flag;
/// steps observe it here and unwind with [`PipelineError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    token: CancellationToken,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Await an external call, then checkpoint. A call already in flight
    /// when cancellation arrives still completes, but its result is dropped.
    pub async fn settle<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = call.await;
        self.check()?;
        outcome
    }

    /// Sleep between page actions; wakes early when cancellation is requested.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.token.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

/// Mutable state for one scenario execution
pub struct RunContext {
    instance_id: InstanceId,
    target: TargetHandle,
    params: Params,
    log: RunLog,
    checkpoint: Checkpoint,
    host: Arc<dyn HostBridge>,
    results: Results,
}

impl RunContext {
    pub fn new(
        instance_id: InstanceId,
        target: TargetHandle,
        params: Params,
        log: RunLog,
        checkpoint: Checkpoint,
        host: Arc<dyn HostBridge>,
    ) -> Self {
        Self {
            instance_id,
            target,
            params,
            log,
            checkpoint,
            host,
            results: Results::new(),
        }
    }

    pub(crate) fn with_results(mut self, results: Results) -> Self {
        self.results = results;
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn target(&self) -> &TargetHandle {
        &self.target
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Shorthand for `checkpoint().check()`
    pub fn check(&self) -> Result<()> {
        self.checkpoint.check()
    }

    pub fn host(&self) -> &Arc<dyn HostBridge> {
        &self.host
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut Results {
        &mut self.results
    }

    pub(crate) fn into_results(self) -> Results {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_roundtrip_and_require() {
        let mut results = Results::new();
        results.insert("count", &3u32).unwrap();

        assert_eq!(results.get::<u32>("count").unwrap(), Some(3));
        assert_eq!(results.get::<u32>("missing").unwrap(), None);

        let err = results.require::<Vec<String>>("videos").unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
    }

    #[test]
    fn test_params_accessors() {
        let params = Params::new().with("userQuery", "rust async").with("limit", 3);
        assert_eq!(params.get_str("userQuery"), Some("rust async"));
        assert_eq!(params.get("limit").and_then(Value::as_u64), Some(3));
        assert_eq!(params.get_str("limit"), None);
    }

    #[tokio::test]
    async fn test_settle_discards_result_after_cancel() {
        let checkpoint = Checkpoint::new();
        let inner = checkpoint.clone();

        let outcome = checkpoint
            .settle(async move {
                inner.cancel();
                Ok::<_, PipelineError>(42)
            })
            .await;

        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let checkpoint = Checkpoint::new();
        checkpoint.cancel();
        let outcome = checkpoint.sleep(Duration::from_secs(30)).await;
        assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    }
}
