//! Named serial task queues.
//!
//! Tasks pushed under the same queue name run one at a time in push order.
//! Distinct queue names drain independently. A queue exists only while it
//! has work: the drainer removes it once empty, and the next push creates
//! it again with a fresh drainer.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use latchkey_core::{LatchkeyResult, QueueError};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedJob {
    task_name: String,
    // Mutex only makes the stored job `Sync`; it is never contended.
    job: std::sync::Mutex<Job>,
}

type Queues = DashMap<String, VecDeque<QueuedJob>>;

// ============================================================================
// QUEUE
// ============================================================================

/// Set of named FIFO queues sharing one map.
#[derive(Clone, Default)]
pub struct SerialTaskQueue {
    queues: Arc<Queues>,
}

impl SerialTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `handler` on `queue_name`.
    ///
    /// The returned ticket resolves to the handler's own result once it has
    /// run. A handler error or panic settles only its ticket; the queue moves
    /// on to the next task either way.
    pub fn push<F, Fut, T>(
        &self,
        queue_name: impl Into<String>,
        task_name: impl Into<String>,
        handler: F,
    ) -> QueueTicket<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LatchkeyResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let queue_name = queue_name.into();
        let task_name = task_name.into();
        let (tx, rx) = oneshot::channel();
        let ticket = QueueTicket {
            queue_name: queue_name.clone(),
            task_name: task_name.clone(),
            rx,
        };

        let Ok(handle) = Handle::try_current() else {
            let _ = tx.send(Err(QueueError::NoRuntime { queue_name }.into()));
            return ticket;
        };

        let job_queue = queue_name.clone();
        let job_task = task_name.clone();
        let job: Job = Box::pin(async move {
            let outcome = match AssertUnwindSafe(async move { handler().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(queue = %job_queue, task = %job_task, "Queued task panicked");
                    Err(QueueError::HandlerPanicked {
                        queue_name: job_queue,
                        task_name: job_task,
                    }
                    .into())
                }
            };
            // Caller may have dropped the ticket.
            let _ = tx.send(outcome);
        });

        let fresh = match self.queues.entry(queue_name.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().push_back(QueuedJob {
                    task_name,
                    job: std::sync::Mutex::new(job),
                });
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(VecDeque::from([QueuedJob {
                    task_name,
                    job: std::sync::Mutex::new(job),
                }]));
                true
            }
        };

        if fresh {
            tracing::debug!(queue = %queue_name, "Queue created");
            handle.spawn(drain(Arc::clone(&self.queues), queue_name));
        }

        ticket
    }

    /// Number of queues that currently have a drainer.
    pub fn live_queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn is_live(&self, queue_name: &str) -> bool {
        self.queues.contains_key(queue_name)
    }

    /// Tasks pushed but not yet started. A running task is not counted.
    pub fn pending(&self, queue_name: &str) -> usize {
        self.queues.get(queue_name).map_or(0, |queue| queue.len())
    }
}

impl fmt::Debug for SerialTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("SerialTaskQueue")
            .field("live_queues", &names)
            .finish()
    }
}

async fn drain(queues: Arc<Queues>, queue_name: String) {
    loop {
        let next = match queues.get_mut(&queue_name) {
            Some(mut queue) => queue.pop_front(),
            None => return,
        };

        match next {
            Some(queued) => {
                let job = queued
                    .job
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                job.await;
                tracing::info!(queue = %queue_name, task = %queued.task_name, "Processed task");
                tokio::task::yield_now().await;
            }
            None => {
                // A push may land between the pop and here; only an empty
                // queue is removed.
                if queues
                    .remove_if(&queue_name, |_, queue| queue.is_empty())
                    .is_some()
                {
                    tracing::info!(queue = %queue_name, "Queue exhausted");
                    return;
                }
            }
        }
    }
}

// ============================================================================
// TICKET
// ============================================================================

/// Completion handle for a queued task.
///
/// Dropping the ticket does not cancel the task.
#[derive(Debug)]
pub struct QueueTicket<T> {
    queue_name: String,
    task_name: String,
    rx: oneshot::Receiver<LatchkeyResult<T>>,
}

impl<T> QueueTicket<T> {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }
}

impl<T> Future for QueueTicket<T> {
    type Output = LatchkeyResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueueError::Dropped {
                queue_name: self.queue_name.clone(),
                task_name: self.task_name.clone(),
            }
            .into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
