//! 延迟任务管理
//!
//! Deferred work spawned from the consume path (payment confirmation waits)
//! is registered here so the consumer loop never blocks on it. Shutdown
//! drains the registry: tasks get a grace period to finish, stragglers are
//! cancelled.

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// 已注册的任务
struct RegisteredTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// 延迟任务管理器
///
/// ```ignore
/// let tasks = PendingTasks::new(CancellationToken::new());
///
/// let token = tasks.shutdown_token();
/// tasks.spawn("payment_gate", async move {
///     tokio::select! {
///         _ = token.cancelled() => {}
///         _ = tokio::time::sleep(wait) => publish().await,
///     }
/// });
///
/// tasks.drain(grace).await;
/// ```
pub struct PendingTasks {
    tasks: Mutex<Vec<RegisteredTask>>,
    shutdown: CancellationToken,
}

impl PendingTasks {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// 获取取消令牌（任务内部监听 shutdown 信号）
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册并启动一个任务
    ///
    /// Panics inside the task are caught and logged. Finished tasks are
    /// pruned on every call so the registry stays bounded.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let wrapped_future = async move {
            let result: Result<(), Box<dyn std::any::Any + Send>> =
                AssertUnwindSafe(future).catch_unwind().await;
            if let Err(panic_info) = result {
                let panic_msg: String = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!(task = %name, panic = %panic_msg, "Pending task panicked");
            }
        };

        let handle = tokio::spawn(wrapped_future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.handle.is_finished());
        tasks.push(RegisteredTask { name, handle });
        tracing::debug!(task = %name, pending = tasks.len(), "Registered pending task");
    }

    /// Number of tasks that have not finished yet
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 等待所有任务完成，超时后取消剩余任务
    ///
    /// Tasks get up to `grace` to finish on their own; whatever is still
    /// running afterwards is cancelled through the shutdown token and joined.
    /// A zero `grace` cancels immediately.
    pub async fn drain(&self, grace: Duration) {
        let mut tasks: Vec<RegisteredTask> = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            self.shutdown.cancel();
            return;
        }
        tracing::info!("Waiting for {} pending task(s)...", tasks.len());

        let joined =
            tokio::time::timeout(grace, join_all(tasks.iter_mut().map(|task| &mut task.handle)))
                .await;

        match joined {
            Ok(results) => {
                self.shutdown.cancel();
                for (task, result) in tasks.iter().zip(results) {
                    log_outcome(task.name, result);
                }
            }
            Err(_) => {
                let unfinished: Vec<RegisteredTask> = tasks
                    .into_iter()
                    .filter(|task| !task.handle.is_finished())
                    .collect();
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Cancelling {} task(s) still pending",
                    unfinished.len()
                );
                self.shutdown.cancel();
                for task in unfinished {
                    log_outcome(task.name, task.handle.await);
                }
            }
        }
    }
}

fn log_outcome(name: &'static str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => tracing::debug!(task = %name, "Task completed"),
        Err(e) if e.is_cancelled() => tracing::debug!(task = %name, "Task cancelled"),
        Err(e) => tracing::error!(task = %name, error = ?e, "Task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_without_grace_cancels_waiting_task() {
        let tasks = PendingTasks::new(CancellationToken::new());
        let completed = Arc::new(AtomicBool::new(false));

        let token = tasks.shutdown_token();
        let flag = completed.clone();
        tasks.spawn("slow", async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(30)) => flag.store(true, Ordering::SeqCst),
            }
        });
        assert_eq!(tasks.len(), 1);

        tasks.drain(Duration::ZERO).await;
        assert!(!completed.load(Ordering::SeqCst));
        assert!(tasks.is_empty());
        assert!(tasks.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_lets_waiting_task_finish() {
        let tasks = PendingTasks::new(CancellationToken::new());
        let completed = Arc::new(AtomicBool::new(false));

        let token = tasks.shutdown_token();
        let flag = completed.clone();
        tasks.spawn("gate", async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => flag.store(true, Ordering::SeqCst),
            }
        });

        tasks.drain(Duration::from_secs(2)).await;
        assert!(completed.load(Ordering::SeqCst));
        assert!(tasks.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_cancels_tasks_past_grace() {
        let tasks = PendingTasks::new(CancellationToken::new());
        let completed = Arc::new(AtomicBool::new(false));

        let token = tasks.shutdown_token();
        let flag = completed.clone();
        tasks.spawn("slow", async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(30)) => flag.store(true, Ordering::SeqCst),
            }
        });

        tokio::time::timeout(Duration::from_secs(1), tasks.drain(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finished_tasks_are_pruned() {
        let tasks = PendingTasks::new(CancellationToken::new());
        tasks.spawn("quick", async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tasks.is_empty());

        tasks.spawn("another", async {});
        assert_eq!(tasks.tasks.lock().len(), 1);
        tasks.drain(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let tasks = PendingTasks::new(CancellationToken::new());
        tasks.spawn("boom", async {
            panic!("payment gateway exploded");
        });
        tasks.drain(Duration::from_secs(1)).await;
        assert!(tasks.is_empty());
    }
}
