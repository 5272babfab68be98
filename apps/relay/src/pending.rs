//! Pending request table
//!
//! Each in-flight `send_request` owns one entry keyed by its request id. The
//! entry is a one-shot sender: the first reply, failure, or removal wins.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use tts_tunnel_common::{Result, TunnelError, TunnelMessage};

type Reply = Result<TunnelMessage>;

/// Request id -> single-resolution reply slot, per worker connection
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<String, oneshot::Sender<Reply>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request id and return the receiving half of its slot
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(request_id.to_string(), tx);
        rx
    }

    /// Deliver a RESPONSE or ERROR to its waiter; false if the id is unknown
    pub fn resolve(&self, request_id: &str, reply: TunnelMessage) -> bool {
        match self.entries.remove(request_id) {
            Some((_, tx)) => {
                if tx.send(Ok(reply)).is_err() {
                    debug!("Waiter for {} already gone", request_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, request_id: &str) {
        self.entries.remove(request_id);
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail every outstanding request with a ConnectionError and clear the table
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;

        for id in ids {
            if let Some((_, tx)) = self.entries.remove(&id) {
                let _ = tx.send(Err(TunnelError::ConnectionError(reason.to_string())));
                failed += 1;
            }
        }

        failed
    }
}

/// Removes its request id from the table when dropped, whatever the exit path
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    request_id: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingRequests, request_id: &'a str) -> Self {
        Self {
            pending,
            request_id,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}
