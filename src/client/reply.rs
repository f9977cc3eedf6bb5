//! Pending-request correlation.
//!
//! Every request frame carries a request id; the matching response resolves
//! a oneshot the caller awaits. Expiries live in a deadline heap vacuumed
//! periodically by the protocol loop, and everything still pending drains
//! with an error when the connection goes away.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::oneshot::{self, Receiver, Sender};

#[derive(Debug)]
pub enum Reply<R, E> {
    Ok(R),
    Err(E),
    Timeout,
}

#[derive(PartialEq, Eq)]
struct RegisteredTimeout {
    request_id: String,
    expires_at: Instant,
}

impl Ord for RegisteredTimeout {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap on expiry.
        other.expires_at.cmp(&self.expires_at)
    }
}

impl PartialOrd for RegisteredTimeout {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct ReplyManager<R, E> {
    pending: Mutex<HashMap<String, Sender<Reply<R, E>>>>,
    timeouts: RwLock<BinaryHeap<RegisteredTimeout>>,
}

impl<R, E> Default for ReplyManager<R, E> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeouts: RwLock::new(BinaryHeap::new()),
        }
    }
}

impl<R, E> ReplyManager<R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request_id: impl Into<String>, expires_in: Duration) -> Receiver<Reply<R, E>> {
        let (tx, rx) = oneshot::channel();
        let request_id = request_id.into();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request_id.clone(), tx);
        }
        if let Ok(mut timeouts) = self.timeouts.write() {
            timeouts.push(RegisteredTimeout {
                request_id,
                expires_at: Instant::now() + expires_in,
            });
        }
        rx
    }

    fn take(&self, request_id: &str) -> Option<Sender<Reply<R, E>>> {
        self.pending.lock().ok()?.remove(request_id)
    }

    pub fn ok(&self, request_id: &str, result: R) -> bool {
        match self.take(request_id) {
            Some(tx) => tx.send(Reply::Ok(result)).is_ok(),
            None => false,
        }
    }

    pub fn error(&self, request_id: &str, error: E) -> bool {
        match self.take(request_id) {
            Some(tx) => tx.send(Reply::Err(error)).is_ok(),
            None => false,
        }
    }

    /// Time out everything whose deadline has passed.
    pub fn vacuum(&self) {
        let now = Instant::now();
        loop {
            let expired = {
                let Ok(timeouts) = self.timeouts.read() else {
                    return;
                };
                match timeouts.peek() {
                    Some(entry) if entry.expires_at <= now => true,
                    _ => false,
                }
            };
            if !expired {
                break;
            }
            let entry = self.timeouts.write().ok().and_then(|mut t| t.pop());
            let Some(entry) = entry else { break };
            if let Some(tx) = self.take(&entry.request_id) {
                let _ = tx.send(Reply::Timeout);
            }
        }
    }
}

impl<R, E: Clone> ReplyManager<R, E> {
    /// Reject everything still pending; called on disconnect.
    pub fn drain_all(&self, error: E) {
        let drained: Vec<Sender<Reply<R, E>>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().map(|(_, tx)| tx).collect(),
            Err(_) => return,
        };
        for tx in drained {
            let _ = tx.send(Reply::Err(error.clone()));
        }
        if let Ok(mut timeouts) = self.timeouts.write() {
            timeouts.clear();
        }
    }
}
