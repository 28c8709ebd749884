//! In-flight operation tracking
//!
//! Every queued upload or download is registered under its key (local path
//! for uploads, remote path or lookup hash for downloads) before it is
//! enqueued, and removed once its task finishes.

use crate::status::OpKind;
use crate::{Result, SdkError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct InFlight {
    op: OpKind,
    token: CancellationToken,
}

/// Concurrent map from key to in-flight operation
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: DashMap<String, InFlight>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; a key can only be in flight once
    pub fn register(&self, key: &str, op: OpKind, token: CancellationToken) -> Result<()> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(SdkError::InProgress(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(InFlight { op, token });
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<OpKind> {
        self.entries.get(key).map(|e| e.op)
    }

    /// Cancel the operation registered under `key`
    pub fn cancel(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn complete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel everything, used on teardown
    pub fn cancel_all(&self) {
        for entry in self.entries.iter() {
            entry.token.cancel();
        }
    }
}

/// Delivers the outcome of a request and clears its registry entry
///
/// Dropping it without [`Completion::finish`] still clears the entry; the
/// waiting handle then observes `Cancelled`.
pub(crate) struct Completion {
    registry: Option<Arc<ProgressRegistry>>,
    key: String,
    sender: Option<oneshot::Sender<Result<()>>>,
}

impl Completion {
    pub(crate) fn finish(mut self, outcome: Result<()>) {
        self.clear();
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome);
        }
    }

    fn clear(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.complete(&self.key);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Accepted asynchronous operation
#[derive(Debug)]
pub struct OperationHandle {
    key: String,
    op: OpKind,
    token: CancellationToken,
    outcome: oneshot::Receiver<Result<()>>,
}

impl OperationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the operation to finish
    pub async fn wait(self) -> Result<()> {
        self.outcome.await.unwrap_or(Err(SdkError::Cancelled))
    }
}

/// Register `key` and build the handle/completion pair for one request
pub(crate) fn track(
    registry: &Arc<ProgressRegistry>,
    key: &str,
    op: OpKind,
    token: CancellationToken,
) -> Result<(OperationHandle, Completion)> {
    registry.register(key, op, token.clone())?;

    let (sender, outcome) = oneshot::channel();
    let handle = OperationHandle {
        key: key.to_string(),
        op,
        token,
        outcome,
    };
    let completion = Completion {
        registry: Some(Arc::clone(registry)),
        key: key.to_string(),
        sender: Some(sender),
    };

    Ok((handle, completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_rejected() {
        let registry = ProgressRegistry::new();
        registry
            .register("/tmp/a", OpKind::Upload, CancellationToken::new())
            .unwrap();

        assert!(matches!(
            registry.register("/tmp/a", OpKind::Upload, CancellationToken::new()),
            Err(SdkError::InProgress(_))
        ));
        assert_eq!(registry.lookup("/tmp/a"), Some(OpKind::Upload));
    }

    #[test]
    fn test_cancel_unknown_key() {
        let registry = ProgressRegistry::new();
        assert!(!registry.cancel("/missing"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_fires_token() {
        let registry = ProgressRegistry::new();
        let token = CancellationToken::new();
        registry.register("/r", OpKind::Download, token.clone()).unwrap();

        assert!(registry.cancel("/r"));
        assert!(token.is_cancelled());
        assert!(registry.complete("/r"));
        assert!(!registry.complete("/r"));
    }

    #[tokio::test]
    async fn test_completion_delivers_outcome() {
        let registry = Arc::new(ProgressRegistry::new());
        let (handle, completion) =
            track(&registry, "/a", OpKind::Upload, CancellationToken::new()).unwrap();

        assert_eq!(registry.len(), 1);
        completion.finish(Err(SdkError::NotFound("/a".into())));

        assert!(registry.is_empty());
        assert!(matches!(handle.wait().await, Err(SdkError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_cancelled() {
        let registry = Arc::new(ProgressRegistry::new());
        let (handle, completion) =
            track(&registry, "/a", OpKind::Download, CancellationToken::new()).unwrap();

        drop(completion);

        assert!(registry.is_empty());
        assert!(matches!(handle.wait().await, Err(SdkError::Cancelled)));
    }
}
