//! Pending request table.
//!
//! Each in-flight request id maps to exactly one completion, which is removed
//! and invoked exactly once: on its response, or when the table is drained.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use log::{debug, error};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::types::RequestId;

/// How a request's outcome is delivered.
pub enum Completion {
    /// Resolve/reject pair backing an awaited call.
    Reply(oneshot::Sender<Result<Value>>),
    /// Single-shot callback; receives `None` when the request fails.
    Callback(Box<dyn FnOnce(Option<Value>) + Send>),
}

impl Completion {
    pub fn callback(f: impl FnOnce(Option<Value>) + Send + 'static) -> Self {
        Completion::Callback(Box::new(f))
    }

    pub fn resolve(self, value: Value) {
        match self {
            // The receiver may have been dropped by a caller that gave up.
            Completion::Reply(tx) => {
                let _ = tx.send(Ok(value));
            }
            Completion::Callback(f) => f(Some(value)),
        }
    }

    pub fn reject(self, error: Error) {
        match self {
            Completion::Reply(tx) => {
                let _ = tx.send(Err(error));
            }
            Completion::Callback(f) => f(None),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Reply(_) => f.write_str("Reply"),
            Completion::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    completion: Completion,
    created_at: Instant,
}

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: HashMap<RequestId, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new in-flight request.
    ///
    /// A duplicate id leaves the existing entry in place; the new completion
    /// is rejected with [`Error::DuplicateRequestId`].
    pub fn register(&mut self, id: RequestId, completion: Completion) -> Result<()> {
        if self.pending.contains_key(&id) {
            error!("Request id {id} registered while still pending");
            completion.reject(Error::DuplicateRequestId(id.clone()));
            return Err(Error::DuplicateRequestId(id));
        }
        self.pending.insert(
            id,
            PendingRequest {
                completion,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Complete `id` successfully. Returns `false` for unknown ids.
    pub fn resolve(&mut self, id: &RequestId, value: Value) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                pending.completion.resolve(value);
                true
            }
            None => false,
        }
    }

    /// Fail `id`. Returns `false` for unknown ids.
    pub fn reject(&mut self, id: &RequestId, error: Error) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                pending.completion.reject(error);
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with [`Error::ConnectionClosed`].
    pub fn drain_all(&mut self, reason: &str) -> usize {
        let drained = self.pending.len();
        if let Some(age) = self.oldest_age() {
            debug!("Draining {drained} pending requests, oldest waited {age:?}");
        }
        for (_, pending) in self.pending.drain() {
            pending.completion.reject(Error::connection_closed(reason));
        }
        drained
    }

    /// How long the longest-waiting request has been pending.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.pending
            .values()
            .map(|pending| pending.created_at.elapsed())
            .max()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
