//! Scrape Runner: drives a single scrape to completion.
//!
//! Seeds a `TaskQueue` from the scrape's config entrypoints, then runs a
//! bounded pool of concurrent workers against it until no task remains
//! outstanding — including tasks a handler has not yet enqueued. A
//! shared outstanding-work counter plus `Notify` decides termination:
//! incremented before a task is ever queued, decremented only once its
//! processing (and any resulting child-task pushes) is fully done.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hydrocarbon_common::{ErrorKind, Scrape, ScrapeCounters, Task, TaskError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fact_writer::FactWriter;
use crate::http_client::HttpClient;
use crate::queue::{recv_shared, SharedReceiver, TaskQueue, TaskQueueSender};
use crate::registry::{route_task, Context, HandlerOpts, Plugin};

/// What the caller (Worker Pool) sees once a scrape finishes: whether it
/// ran clean or hit its error cap, plus the final counters to persist.
pub struct RunnerOutcome {
    pub success: bool,
    pub counters: ScrapeCounters,
    pub errors: Vec<String>,
}

struct WorkTracker {
    outstanding: AtomicI64,
    idle: Notify,
}

impl WorkTracker {
    fn new() -> Self {
        Self { outstanding: AtomicI64::new(0), idle: Notify::new() }
    }

    fn begin(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            // Register interest before checking, so a concurrent `end()`
            // can't drop to zero and notify in the gap between the check
            // and the await.
            let notified = self.idle.notified();
            if self.outstanding.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Bounds the total number of tasks a scrape will ever admit to its queue
/// (seeded entrypoints, child tasks, retries and rate-limit requeues).
/// Hitting the cap does not drop tasks already in flight, it just refuses
/// to admit more and flags the scrape as having hit its hard cap.
struct TaskBudget {
    dispatched: AtomicU32,
    cap: u32,
}

impl TaskBudget {
    fn new(cap: usize, already_seeded: usize) -> Self {
        Self { dispatched: AtomicU32::new(already_seeded as u32), cap: cap.max(1) as u32 }
    }

    /// Atomically claims one slot against the cap. Returns `false` if the
    /// cap has already been reached.
    fn try_reserve(&self) -> bool {
        loop {
            let current = self.dispatched.load(Ordering::SeqCst);
            if current >= self.cap {
                return false;
            }
            if self.dispatched.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                return true;
            }
        }
    }
}

pub async fn run_scrape(
    scrape: &Scrape,
    plugin: Arc<dyn Plugin>,
    http: Arc<HttpClient>,
    fact_writer: Arc<FactWriter>,
    max_concurrency: usize,
    max_task_retries: u32,
    max_scrape_errors: usize,
    max_queued_tasks: usize,
    cancel: CancellationToken,
) -> RunnerOutcome {
    let queue = TaskQueue::seeded(max_queued_tasks.max(1), scrape.config.entrypoints.clone());
    let (sender, receiver) = queue.into_shared();
    let tracker = Arc::new(WorkTracker::new());
    for _ in &scrape.config.entrypoints {
        tracker.begin();
    }

    let budget = Arc::new(TaskBudget::new(max_queued_tasks, scrape.config.entrypoints.len()));
    let hard_cap_hit = Arc::new(AtomicBool::new(false));
    let total_tasks = Arc::new(AtomicU32::new(0));
    let total_retries = Arc::new(AtomicU32::new(0));
    let total_datums = Arc::new(AtomicU32::new(0));
    let errors: Arc<tokio::sync::Mutex<Vec<String>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let overflow_errors = Arc::new(AtomicU32::new(0));

    let done = cancel.child_token();

    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..max_concurrency.max(1) {
        let plugin = plugin.clone();
        let http = http.clone();
        let fact_writer = fact_writer.clone();
        let sender = sender.clone();
        let receiver = receiver.clone();
        let tracker = tracker.clone();
        let budget = budget.clone();
        let hard_cap_hit = hard_cap_hit.clone();
        let total_tasks = total_tasks.clone();
        let total_retries = total_retries.clone();
        let total_datums = total_datums.clone();
        let errors = errors.clone();
        let overflow_errors = overflow_errors.clone();
        let worker_cancel = cancel.clone();
        let worker_done = done.clone();
        let scrape_id = scrape.id;

        workers.spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = worker_done.cancelled() => break,
                    task = recv_shared(&receiver) => task,
                };
                let Some(task) = task else { break };

                total_tasks.fetch_add(1, Ordering::Relaxed);
                let outcome = process_task(
                    &plugin,
                    &http,
                    &fact_writer,
                    scrape_id,
                    task.clone(),
                    &sender,
                    &tracker,
                    &budget,
                    &hard_cap_hit,
                    max_task_retries,
                    &worker_cancel,
                    &worker_done,
                )
                .await;

                tracker.end();

                match outcome {
                    TaskOutcome::Facts(count) => {
                        total_datums.fetch_add(count, Ordering::Relaxed);
                    }
                    TaskOutcome::Retried => {
                        total_retries.fetch_add(1, Ordering::Relaxed);
                    }
                    TaskOutcome::Dropped(message) => {
                        let mut guard = errors.lock().await;
                        if guard.len() < max_scrape_errors {
                            guard.push(message);
                        } else {
                            overflow_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    TaskOutcome::RateLimited => {}
                }
            }
        });
    }

    tokio::select! {
        _ = tracker.wait_drained() => {}
        _ = done.cancelled() => {}
    }
    done.cancel();
    drop(sender);
    while workers.join_next().await.is_some() {}

    let mut errors = Arc::try_unwrap(errors).map(|m| m.into_inner()).unwrap_or_default();
    let overflow = overflow_errors.load(Ordering::Relaxed);
    if overflow > 0 {
        errors.push(format!("{overflow} additional errors suppressed past the {max_scrape_errors}-entry cap"));
    }
    let hit_cap = hard_cap_hit.load(Ordering::Relaxed);
    if hit_cap {
        warn!(scrape_id = %scrape.id, max_queued_tasks, "scrape hit its hard task cap");
        errors.push(format!("hard task cap of {max_queued_tasks} tasks reached"));
    }
    let success = errors.is_empty() && overflow == 0 && !hit_cap;

    info!(
        scrape_id = %scrape.id,
        total_tasks = total_tasks.load(Ordering::Relaxed),
        total_datums = total_datums.load(Ordering::Relaxed),
        success,
        "scrape finished"
    );

    RunnerOutcome {
        success,
        counters: ScrapeCounters {
            total_datums: total_datums.load(Ordering::Relaxed) as i64,
            total_retries: total_retries.load(Ordering::Relaxed) as i64,
            total_tasks: total_tasks.load(Ordering::Relaxed) as i64,
        },
        errors,
    }
}

enum TaskOutcome {
    Facts(u32),
    Retried,
    RateLimited,
    Dropped(String),
}

#[allow(clippy::too_many_arguments)]
async fn process_task(
    plugin: &Arc<dyn Plugin>,
    http: &Arc<HttpClient>,
    fact_writer: &Arc<FactWriter>,
    scrape_id: Uuid,
    task: Task,
    sender: &TaskQueueSender,
    tracker: &Arc<WorkTracker>,
    budget: &Arc<TaskBudget>,
    hard_cap_hit: &Arc<AtomicBool>,
    max_task_retries: u32,
    cancel: &CancellationToken,
    done: &CancellationToken,
) -> TaskOutcome {
    let Some((handler, params)) = route_task(plugin.as_ref(), &task.url) else {
        return TaskOutcome::Dropped(format!("no route matched for {}", task.url));
    };

    let cx = Context { cancel: cancel.clone() };
    let opts = HandlerOpts { http: http.clone(), params };

    // Admits one more unit of queued work against the hard task cap. On
    // refusal, flags the scrape as having hit its cap and stops accepting
    // further work rather than growing the queue unbounded.
    let admit = |tracker: &Arc<WorkTracker>| -> bool {
        if budget.try_reserve() {
            tracker.begin();
            true
        } else {
            hard_cap_hit.store(true, Ordering::Relaxed);
            done.cancel();
            false
        }
    };

    match handler.handle(&cx, &opts, task.clone()).await {
        Ok(response) => {
            let mut written = 0u32;
            for fact in response.facts {
                if fact_writer.write(scrape_id, fact).await.is_ok() {
                    written += 1;
                }
            }
            for child in response.tasks {
                if admit(tracker) && sender.push(child, cancel).await.is_err() {
                    tracker.end();
                }
            }
            TaskOutcome::Facts(written)
        }
        Err(TaskError { kind: ErrorKind::Transient, message }) => {
            if task.retries + 1 <= max_task_retries {
                if !admit(tracker) {
                    return TaskOutcome::Dropped(format!("{}: hard task cap reached before retry", task.url));
                }
                let mut retried = task;
                retried.retries += 1;
                if sender.push(retried, cancel).await.is_err() {
                    tracker.end();
                }
                TaskOutcome::Retried
            } else {
                TaskOutcome::Dropped(format!("{} exhausted retries: {message}", task.url))
            }
        }
        Err(TaskError { kind: ErrorKind::RateLimited, .. }) => {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if !admit(tracker) {
                return TaskOutcome::Dropped(format!("{}: hard task cap reached before rate-limit requeue", task.url));
            }
            if sender.push(task, cancel).await.is_err() {
                tracker.end();
            }
            TaskOutcome::RateLimited
        }
        Err(TaskError { kind: ErrorKind::Permanent, message }) => {
            TaskOutcome::Dropped(format!("{}: {message}", task.url))
        }
    }
}
