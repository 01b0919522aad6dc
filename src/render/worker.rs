// src/render/worker.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tokio::sync::oneshot;

use crate::error::{ChatError, Result};

type Pending<Resp> = Arc<Mutex<HashMap<u64, oneshot::Sender<Resp>>>>;

struct Envelope<Req> {
    id: u64,
    request: Req,
}

/// Request/response channel to a dedicated worker thread.
///
/// Every call gets a correlation id; the reply is routed back to the waiting
/// caller through the pending table, so callers never block the worker and
/// the worker never calls back into them.
pub struct WorkerChannel<Req, Resp> {
    next_id: AtomicU64,
    pending: Pending<Resp>,
    tx: Mutex<Option<mpsc::Sender<Envelope<Req>>>>,
}

impl<Req, Resp> WorkerChannel<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn spawn<F>(name: &str, handler: F) -> Result<Self>
    where
        F: Fn(Req) -> Resp + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Envelope<Req>>();
        let pending: Pending<Resp> = Arc::new(Mutex::new(HashMap::new()));
        let replies = pending.clone();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(Envelope { id, request }) = rx.recv() {
                    let response = handler(request);
                    let waiter = replies.lock().ok().and_then(|mut p| p.remove(&id));
                    match waiter {
                        Some(reply) => {
                            let _ = reply.send(response);
                        }
                        None => tracing::debug!("[worker] no caller waiting for #{}", id),
                    }
                }
                tracing::debug!("[worker] request channel closed, exiting");
            })?;

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            tx: Mutex::new(Some(tx)),
        })
    }

    pub async fn run(&self, request: Req) -> Result<Resp> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.pending
            .lock()
            .map_err(|_| ChatError::WorkerClosed)?
            .insert(id, reply_tx);

        let sent = self
            .tx
            .lock()
            .map_err(|_| ChatError::WorkerClosed)?
            .as_ref()
            .map(|tx| tx.send(Envelope { id, request }).is_ok())
            .unwrap_or(false);

        if !sent {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(ChatError::WorkerClosed);
        }

        reply_rx.await.map_err(|_| ChatError::WorkerClosed)
    }

    /// Stop accepting requests. The worker thread exits once its queue drains.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_reach_their_callers() {
        let worker = WorkerChannel::spawn("test-worker", |n: u32| n * 2).unwrap();
        let (a, b, c) = tokio::join!(worker.run(1), worker.run(2), worker.run(3));
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (2, 4, 6));
        assert_eq!(worker.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_worker_rejects_requests() {
        let worker = WorkerChannel::spawn("test-worker", |s: String| s.len()).unwrap();
        assert_eq!(worker.run("abc".into()).await.unwrap(), 3);
        worker.close();
        let err = worker.run("x".into()).await.unwrap_err();
        assert!(matches!(err, ChatError::WorkerClosed));
    }
}
