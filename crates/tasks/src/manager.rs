use std::any::Any;
use std::future::Future;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, TryFutureExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::shutdown::{Shutdown, ShutdownGuard, ShutdownSignal};

/// Terminal failure of a critical task: either it panicked or it returned an
/// error.  Either way the group comes down.
#[derive(Debug, thiserror::Error)]
pub enum CriticalTaskError {
    #[error("critical task `{task_name}` panicked: `{msg}`")]
    Panicked { task_name: String, msg: String },

    #[error("critical task `{task_name}` failed: {error}")]
    Failed {
        task_name: String,
        #[source]
        error: anyhow::Error,
    },
}

impl CriticalTaskError {
    fn from_panic(task_name: &str, error: Box<dyn Any>) -> Self {
        let msg = match error.downcast::<String>() {
            Ok(value) => *value,
            Err(error) => match error.downcast::<&str>() {
                Ok(value) => value.to_string(),
                Err(_) => "<opaque panic payload>".to_string(),
            },
        };
        Self::Panicked {
            task_name: task_name.to_string(),
            msg,
        }
    }
}

/// [`TaskManager`] spawns and tracks the sidecar's long running service
/// tasks, watches for failures and panics, and manages graceful shutdown on
/// critical failures and external signals.
pub struct TaskManager {
    /// Tokio's runtime [`Handle`].
    tokio_handle: Handle,
    /// Sender half for failure reports from tasks.
    failed_tasks_tx: mpsc::UnboundedSender<CriticalTaskError>,
    /// Receiver half for failure reports from tasks.
    failed_tasks_rx: mpsc::UnboundedReceiver<CriticalTaskError>,
    /// Async-capable shutdown signal that can be sent to tasks.
    shutdown_signal: ShutdownSignal,
    /// Pending tasks counter for graceful shutdown.
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskManager {
    pub fn new(tokio_handle: Handle) -> Self {
        let (failed_tasks_tx, failed_tasks_rx) = mpsc::unbounded_channel();
        Self {
            tokio_handle,
            failed_tasks_tx,
            failed_tasks_rx,
            shutdown_signal: ShutdownSignal::new(),
            pending_tasks_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            tokio_handle: self.tokio_handle.clone(),
            failed_tasks_tx: self.failed_tasks_tx.clone(),
            shutdown_signal: self.shutdown_signal.clone(),
            pending_tasks_counter: self.pending_tasks_counter.clone(),
        }
    }

    /// Get shutdown signal trigger
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_signal.clone()
    }

    /// Installs a ctrl-c listener that triggers shutdown.
    pub fn start_signal_listeners(&self) {
        let shutdown_signal = self.shutdown_signal();
        self.tokio_handle.spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            warn!("Got INT. Initiating shutdown");
            shutdown_signal.send()
        });
    }

    /// Waits until any task fails (returning `Err`) or a shutdown is
    /// requested (returning `Ok`), then winds the group down either way.
    pub fn monitor(mut self, shutdown_timeout: Option<Duration>) -> Result<(), CriticalTaskError> {
        let res = self.wait_for_task_failure(self.shutdown_signal.subscribe());

        self.shutdown_signal.send();
        if !self.wait_for_graceful_shutdown(shutdown_timeout) {
            info!("Shutdown timeout expired; forced shutdown");
        }
        res
    }

    fn wait_for_task_failure(&mut self, shutdown: Shutdown) -> Result<(), CriticalTaskError> {
        self.tokio_handle.block_on(async {
            tokio::select! {
                msg = self.failed_tasks_rx.recv() => {
                    match msg {
                        Some(error) => Err(error),
                        None => Ok(())
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    Ok(())
                }
            }
        })
    }

    /// Waits for all tasks to complete, up to `timeout` if provided.
    fn wait_for_graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let when = timeout.map(|t| std::time::Instant::now() + t);
        while self.pending_tasks_counter.load(Ordering::Relaxed) > 0 {
            if when
                .map(|when| std::time::Instant::now() > when)
                .unwrap_or(false)
            {
                debug!("graceful shutdown timed out");
                return false;
            }
            std::hint::spin_loop();
        }
        debug!("gracefully shut down");
        true
    }
}

/// A type that can spawn new critical tasks.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    tokio_handle: Handle,
    failed_tasks_tx: mpsc::UnboundedSender<CriticalTaskError>,
    shutdown_signal: ShutdownSignal,
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn handle(&self) -> &Handle {
        &self.tokio_handle
    }

    /// Spawns a fallible service future.  The task should poll the
    /// [`ShutdownGuard`] and return `Ok(())` on requested shutdown; a panic
    /// or an `Err` return takes the group down.
    pub fn spawn_critical<F>(
        &self,
        name: &'static str,
        task_fn: impl FnOnce(ShutdownGuard) -> F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let failed_tasks_tx = self.failed_tasks_tx.clone();
        let guard = ShutdownGuard::new(
            self.shutdown_signal.subscribe(),
            self.pending_tasks_counter.clone(),
        );
        let fut = task_fn(guard);

        let task = panic::AssertUnwindSafe(fut)
            .catch_unwind()
            .map_err(|payload| CriticalTaskError::from_panic(name, payload))
            .map(move |res| {
                let failure = match res {
                    Ok(Ok(())) => None,
                    Ok(Err(error)) => Some(CriticalTaskError::Failed {
                        task_name: name.to_string(),
                        error,
                    }),
                    Err(panicked) => Some(panicked),
                };
                if let Some(err) = failure {
                    error!(%name, %err, "critical task failed");
                    let _ = failed_tasks_tx.send(err);
                }
            });

        info!(%name, "Starting critical task");
        self.tokio_handle.spawn(task)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_kills_group() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        executor.spawn_critical("failing-task", |_guard| async {
            Err(anyhow::anyhow!("invariant violated"))
        });

        let err = manager
            .monitor(Some(Duration::from_secs(5)))
            .expect_err("should surface the failure");
        assert!(matches!(err, CriticalTaskError::Failed { ref task_name, .. } if task_name == "failing-task"));
    }

    #[test]
    fn test_task_panic_kills_group() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        // dont want to print stack trace for expected panic while running test
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));

        executor.spawn_critical("panictask", |_guard| async {
            panic!("intentional panic");
        });

        let err = manager
            .monitor(Some(Duration::from_secs(5)))
            .expect_err("should surface the panic");

        panic::set_hook(original_hook);

        match err {
            CriticalTaskError::Panicked { task_name, msg } => {
                assert_eq!(task_name, "panictask");
                assert_eq!(msg, "intentional panic");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clean_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        executor.spawn_critical("loop-task", |guard| async move {
            loop {
                if guard.should_shutdown() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let shutdown_sig = manager.shutdown_signal();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown_sig.send();
        });

        let res = manager.monitor(Some(Duration::from_secs(5)));
        assert!(res.is_ok(), "should exit cleanly");
    }
}
