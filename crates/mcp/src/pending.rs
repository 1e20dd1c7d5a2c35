//! Requests awaiting a reply, keyed by JSON-RPC id.
//!
//! An entry leaves the table exactly once: resolved by a matching response,
//! removed by its caller's timeout, or failed when the server goes away.
//! Whichever happens first wins; the others find nothing to do.

use overlay_core::error::RpcError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting caller.
pub type Reply = Result<Value, RpcError>;

#[derive(Debug)]
struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Reply>,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request and hand back the receiving end of its reply.
    pub fn register(&mut self, id: u64, method: &str) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        rx
    }

    /// Deliver a reply. Returns false when no request with this id is waiting.
    pub fn resolve(&mut self, id: u64, reply: Reply) -> bool {
        match self.entries.remove(&id) {
            Some(request) => {
                // The caller may have given up already
                let _ = request.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Forget a request without replying; returns its method name.
    pub fn remove(&mut self, id: u64) -> Option<String> {
        self.entries.remove(&id).map(|request| request.method)
    }

    /// Reject every waiting request with the same error. Returns how many.
    pub fn fail_all(&mut self, error: RpcError) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            let _ = request.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
