//! Task Queue: a bounded, per-scrape FIFO of pending tasks.
//!
//! One queue exists per running scrape. It is seeded from the plugin's
//! `Config.entrypoints` and grows as handlers enqueue child tasks. The
//! bound (`max_queued_tasks`) backpressures a runaway handler that emits
//! child tasks faster than workers can drain them — `push` suspends
//! until space frees up rather than growing unbounded.

use std::sync::Arc;

use hydrocarbon_common::Task;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
    rx: mpsc::Receiver<Task>,
}

/// A receive half shared by every worker in a Scrape Runner's pool, each
/// locking it only for the duration of a single `recv`.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Task>>>;

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx }
    }

    pub fn seeded(capacity: usize, entrypoints: Vec<String>) -> Self {
        let queue = Self::new(capacity);
        for url in entrypoints {
            // Entrypoints are seeded before any worker starts draining,
            // so the bounded channel can never block here.
            let _ = queue.tx.try_send(Task::new(url));
        }
        queue
    }

    pub fn sender(&self) -> TaskQueueSender {
        TaskQueueSender { tx: self.tx.clone() }
    }

    /// Splits the queue into a cloneable sender and a receive half
    /// shared behind a mutex, so a bounded pool of workers can drain it
    /// concurrently without each needing its own channel.
    pub fn into_shared(self) -> (TaskQueueSender, SharedReceiver) {
        (TaskQueueSender { tx: self.tx }, Arc::new(Mutex::new(self.rx)))
    }

    /// Waits for the next task, or `None` once every sender has dropped
    /// and the queue is drained — the signal a Scrape Runner uses to
    /// know no more tasks will ever arrive.
    pub async fn recv(&mut self) -> Option<Task> {
        self.rx.recv().await
    }
}

/// Receives the next task from a shared queue, locking only for the
/// duration of the call.
pub async fn recv_shared(rx: &SharedReceiver) -> Option<Task> {
    rx.lock().await.recv().await
}

/// A cloneable handle handed to workers so they can push child tasks
/// back onto the same scrape's queue.
#[derive(Clone)]
pub struct TaskQueueSender {
    tx: mpsc::Sender<Task>,
}

impl TaskQueueSender {
    /// Enqueues `task`, suspending if the queue is at capacity until
    /// space frees or `cancel` fires.
    pub async fn push(&self, task: Task, cancel: &CancellationToken) -> Result<(), TaskQueueClosed> {
        tokio::select! {
            result = self.tx.send(task) => result.map_err(|_| TaskQueueClosed),
            _ = cancel.cancelled() => Err(TaskQueueClosed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaskQueueClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_queue_drains_in_fifo_order() {
        let mut queue = TaskQueue::seeded(8, vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(queue.recv().await.unwrap().url, "a");
        assert_eq!(queue.recv().await.unwrap().url, "b");
        assert_eq!(queue.recv().await.unwrap().url, "c");
    }

    #[tokio::test]
    async fn recv_returns_none_once_all_senders_drop() {
        let mut queue = TaskQueue::new(4);
        let sender = queue.sender();
        sender.push(Task::new("x"), &CancellationToken::new()).await.unwrap();
        drop(sender);
        assert_eq!(queue.recv().await.unwrap().url, "x");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn push_is_interrupted_by_cancellation() {
        let queue = TaskQueue::new(1);
        let sender = queue.sender();
        let cancel = CancellationToken::new();
        // Fill capacity, then cancel before the second push can land.
        sender.push(Task::new("first"), &cancel).await.unwrap();
        cancel.cancel();
        let result = sender.push(Task::new("second"), &cancel).await;
        assert!(result.is_err());
    }
}
