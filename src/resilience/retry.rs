// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Serialized retry queue for transient failures.
//!
//! Operations that fail with a transient error are handed to a single worker
//! task that retries them one at a time. Before each attempt the worker waits
//! `backoff.delay(attempts)`; a task that fails transiently again goes back to
//! the *front* of the queue so it is retried before anything queued later.
//! Non-transient failures reject immediately.
//!
//! Only one retry attempt runs at a time. A stalled task blocks the tasks
//! behind it; the per-call timeout in the data manager bounds how long.
//!
//! # Example
//!
//! ```
//! use crm_data::resilience::retry::{RetryConfig, RetryQueue};
//! use crm_data::DataError;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RetryQueue::new(RetryConfig::immediate(3));
//! let result = queue
//!     .execute("ping", || async { Ok::<_, DataError>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(result.value, 42);
//! assert_eq!(result.retries, 0);
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use crate::error::DataError;
use crate::metrics;

/// Retry policy for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first call that failed
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryConfig {
    /// 3 attempts, `1s * attempts` between them.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear {
                base: Duration::from_secs(1),
            },
        }
    }

    /// No delay between attempts (tests, local backends)
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { base: Duration::ZERO },
        }
    }
}

/// A value produced after `retries` extra attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

#[async_trait]
trait QueuedTask: Send {
    fn name(&self) -> &str;
    /// Attempts made so far
    fn attempts(&self) -> u32;
    /// Run once. On success the waiter is resolved and `Ok(())` returned.
    async fn attempt(&mut self) -> Result<(), DataError>;
    fn reject(self: Box<Self>, error: DataError);
}

struct Task<T, F> {
    name: String,
    attempts: u32,
    op: F,
    waiter: Option<oneshot::Sender<Result<Retried<T>, DataError>>>,
}

#[async_trait]
impl<T, F, Fut> QueuedTask for Task<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, DataError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    async fn attempt(&mut self) -> Result<(), DataError> {
        self.attempts += 1;
        let value = (self.op)().await?;
        if let Some(waiter) = self.waiter.take() {
            // Waiter may have given up; the work is done either way
            let _ = waiter.send(Ok(Retried {
                value,
                retries: self.attempts.saturating_sub(1),
            }));
        }
        Ok(())
    }

    fn reject(mut self: Box<Self>, error: DataError) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(error));
        }
    }
}

struct QueueInner {
    config: RetryConfig,
    tasks: Mutex<VecDeque<Box<dyn QueuedTask>>>,
    notify: Notify,
    shutdown: watch::Sender<bool>,
}

impl QueueInner {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn drain_cancelled(&self) {
        let drained: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in drained {
            let name = task.name().to_string();
            task.reject(DataError::Cancelled(name));
        }
        metrics::set_retry_queue_depth(0);
    }
}

/// Single-worker retry queue.
///
/// The worker is spawned on the first enqueue, so constructing a queue does
/// not require a runtime.
pub struct RetryQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryQueue {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                config,
                tasks: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                shutdown,
            }),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    /// Tasks waiting for their next attempt
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Run `op` once; on a transient failure hand it to the queue.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut op: F) -> Result<Retried<T>, DataError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DataError>> + Send + 'static,
    {
        match op().await {
            Ok(value) => Ok(Retried { value, retries: 0 }),
            Err(e) if e.is_transient() && self.inner.config.max_attempts > 1 => {
                warn!(operation = %name, error = %e, "Transient failure, queueing retry");
                self.retry_operation(name, op).await
            }
            Err(e) if e.is_transient() => Err(max_retries(name, 1, e)),
            Err(e) => Err(e),
        }
    }

    /// Queue `op` for retry after one failed attempt made by the caller.
    pub async fn retry_operation<T, F, Fut>(&self, name: &str, op: F) -> Result<Retried<T>, DataError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DataError>> + Send + 'static,
    {
        if self.inner.is_shut_down() {
            return Err(DataError::Cancelled(name.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let task = Task {
            name: name.to_string(),
            attempts: 1,
            op,
            waiter: Some(tx),
        };
        let depth = {
            let mut tasks = self.inner.tasks.lock();
            tasks.push_back(Box::new(task));
            tasks.len()
        };
        metrics::set_retry_queue_depth(depth);
        self.ensure_worker();
        self.inner.notify.notify_one();

        rx.await
            .unwrap_or_else(|_| Err(DataError::Cancelled(name.to_string())))
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(run_worker(inner)));
    }

    /// Stop the worker and reject everything still queued with
    /// [`DataError::Cancelled`]. An attempt already in flight finishes first.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.notify.notify_one();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.drain_cancelled();
        info!("Retry queue shut down");
    }
}

impl Drop for RetryQueue {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        self.inner.notify.notify_one();
    }
}

fn max_retries(name: &str, attempts: u32, last_error: DataError) -> DataError {
    DataError::MaxRetriesExceeded {
        operation: name.to_string(),
        attempts,
        last_error: Box::new(last_error),
    }
}

async fn run_worker(inner: Arc<QueueInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    debug!("Retry worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = inner.tasks.lock().pop_front();
        let Some(mut task) = next else {
            tokio::select! {
                _ = inner.notify.notified() => continue,
                _ = shutdown.changed() => break,
            }
        };
        metrics::set_retry_queue_depth(inner.tasks.lock().len());

        let delay = inner.config.backoff.delay(task.attempts());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                let name = task.name().to_string();
                task.reject(DataError::Cancelled(name));
                break;
            }
        }

        let name = task.name().to_string();
        match task.attempt().await {
            Ok(()) => {
                info!(operation = %name, attempts = task.attempts(), "Retry succeeded");
                metrics::record_retry(&name, "success");
            }
            Err(e) if e.is_transient() && task.attempts() < inner.config.max_attempts => {
                warn!(
                    operation = %name,
                    attempt = task.attempts(),
                    max_attempts = inner.config.max_attempts,
                    error = %e,
                    "Retry failed, requeueing at front"
                );
                metrics::record_retry(&name, "requeued");
                let depth = {
                    let mut tasks = inner.tasks.lock();
                    tasks.push_front(task);
                    tasks.len()
                };
                metrics::set_retry_queue_depth(depth);
            }
            Err(e) if e.is_transient() => {
                warn!(operation = %name, attempts = task.attempts(), error = %e, "Max retries exceeded");
                metrics::record_retry(&name, "exhausted");
                let attempts = task.attempts();
                task.reject(max_retries(&name, attempts, e));
            }
            Err(e) => {
                warn!(operation = %name, error = %e, "Retry failed with non-transient error");
                metrics::record_retry(&name, "failed");
                task.reject(e);
            }
        }
    }

    inner.drain_cancelled();
    debug!("Retry worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn unavailable() -> DataError {
        DataError::Storage(StorageError::Unavailable("backend down".into()))
    }

    fn linear(max_attempts: u32, base_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Backoff::Linear {
                base: Duration::from_millis(base_ms),
            },
        }
    }

    #[tokio::test]
    async fn test_execute_succeeds_first_try() {
        let queue = RetryQueue::new(RetryConfig::immediate(3));
        let result = queue.execute("op", || async { Ok::<_, DataError>(42) }).await.unwrap();
        assert_eq!(result, Retried { value: 42, retries: 0 });
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_reports_two_retries() {
        let queue = RetryQueue::new(linear(3, 1000));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let started = Instant::now();

        let result = queue
            .execute("flaky", move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(unavailable())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before attempt 2, 2s before attempt 3
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let queue = RetryQueue::new(linear(3, 10));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let err = queue
            .execute("always-down", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(unavailable())
                }
            })
            .await
            .unwrap_err();

        match err {
            DataError::MaxRetriesExceeded { operation, attempts, .. } => {
                assert_eq!(operation, "always-down");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // No further attempts after rejection
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_rejects_without_retry() {
        let queue = RetryQueue::new(RetryConfig::immediate(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let err = queue
            .execute("denied", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DataError::PermissionDenied("nope".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::PermissionDenied(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_during_retry_rejects() {
        let queue = RetryQueue::new(RetryConfig::immediate(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let err = queue
            .execute("turns-fatal", move || {
                let calls = calls_clone.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err::<(), _>(unavailable()),
                        _ => Err(DataError::PermissionDenied("revoked".into())),
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::PermissionDenied(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_serialized() {
        let queue = Arc::new(RetryQueue::new(linear(3, 100)));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for i in 0..4 {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let first = Arc::new(AtomicU32::new(0));
                queue
                    .retry_operation(&format!("op-{i}"), move || {
                        let in_flight = in_flight.clone();
                        let max_seen = max_seen.clone();
                        let first = first.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            if first.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(unavailable())
                            } else {
                                Ok(i)
                            }
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_task_runs_before_later_tasks() {
        let queue = Arc::new(RetryQueue::new(linear(3, 100)));
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let calls = Arc::new(AtomicU32::new(0));
                queue
                    .retry_operation("a", move || {
                        let order = order.clone();
                        let calls = calls.clone();
                        async move {
                            order.lock().push("a");
                            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                                Err(unavailable())
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let b = {
            let queue = queue.clone();
            let order = order.clone();
            tokio::spawn(async move {
                queue
                    .retry_operation("b", move || {
                        let order = order.clone();
                        async move {
                            order.lock().push("b");
                            Ok(())
                        }
                    })
                    .await
            })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(*order.lock(), vec!["a", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending() {
        let queue = Arc::new(RetryQueue::new(linear(3, 60_000)));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .retry_operation("slow", || async { Ok::<_, DataError>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.shutdown().await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, DataError::Cancelled(_)));

        // Queue stays closed
        let err = queue
            .retry_operation("late", || async { Ok::<_, DataError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Cancelled(_)));
    }
}
