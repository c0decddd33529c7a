//! Bounded fire-and-forget writer.
//!
//! # Design Decisions
//! - Producers never wait: `push` either queues or drops the record
//! - Under overload the newest record is dropped, counted and warned
//! - A single background task owns the store writes; failures are logged
//!   and the task keeps going
//! - On shutdown the queue is closed and drained before the task exits

use std::future::Future;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::sinks::store::StoreError;

/// What happened to a record handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    Queued,
    Dropped,
}

/// Producer half of a sink queue.
#[derive(Debug)]
pub struct QueueWriter<T> {
    tx: mpsc::Sender<T>,
    sink: &'static str,
}

impl<T> Clone for QueueWriter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            sink: self.sink,
        }
    }
}

impl<T: Send + 'static> QueueWriter<T> {
    /// Spawn the writer task. `write` is called once per record, in order.
    pub fn spawn<W, F>(
        sink: &'static str,
        capacity: usize,
        write: W,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>)
    where
        W: Fn(T) -> F + Send + Sync + 'static,
        F: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    record = rx.recv() => match record {
                        Some(record) => persist(sink, &write, record).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        rx.close();
                        let mut drained = 0usize;
                        while let Some(record) = rx.recv().await {
                            persist(sink, &write, record).await;
                            drained += 1;
                        }
                        tracing::debug!(sink, drained, "Sink writer drained");
                        break;
                    }
                }
            }
        });

        (Self { tx, sink }, handle)
    }

    /// Enqueue without waiting.
    pub fn push(&self, record: T) -> Delivery {
        match self.tx.try_send(record) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(sink = self.sink, "Sink queue full, record dropped");
                metrics::record_sink_dropped(self.sink);
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(sink = self.sink, "Sink writer stopped, record dropped");
                metrics::record_sink_dropped(self.sink);
                Delivery::Dropped
            }
        }
    }
}

async fn persist<T, W, F>(sink: &'static str, write: &W, record: T)
where
    W: Fn(T) -> F,
    F: Future<Output = Result<(), StoreError>>,
{
    if let Err(e) = write(record).await {
        tracing::error!(sink, error = %e, "Sink write failed");
        metrics::record_sink_write_error(sink);
    }
}
