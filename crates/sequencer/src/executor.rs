//! Windows pool transactions and commits them in fee order.

use std::sync::Arc;
use std::time::Duration;

use keel_config::SequencerConfig;
use keel_engine::{MempoolBackend, NewTxsEvent, PoolTx};
use keel_tasks::ShutdownGuard;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::*;

use crate::orderer::Orderer;

pub struct Executor<M, O> {
    cfg: SequencerConfig,
    backend: Arc<M>,
    orderer: O,
}

impl<M, O> Executor<M, O>
where
    M: MempoolBackend,
    O: Orderer,
{
    pub fn new(cfg: SequencerConfig, backend: Arc<M>, orderer: O) -> Self {
        Self {
            cfg,
            backend,
            orderer,
        }
    }

    pub async fn run(self, guard: ShutdownGuard) -> anyhow::Result<()> {
        let mut rx = self.backend.subscribe_new_txs();
        loop {
            let Some(events) = collect_window(
                &mut rx,
                self.cfg.min_execution_interval(),
                self.cfg.max_execution_interval(),
                &guard,
            )
            .await
            else {
                info!("executor stopping");
                return Ok(());
            };

            let txs: Vec<PoolTx> = events.into_iter().flat_map(|ev| ev.txs).collect();
            if txs.is_empty() {
                info!("no txs received in last execution window");
                continue;
            }
            let ordered = self
                .orderer
                .order_transactions(txs)
                .await
                .map_err(|err| anyhow::anyhow!("failed to order txs: {err}"))?;
            if ordered.is_empty() {
                info!("no txs to execute post-ordering");
                continue;
            }
            let num_txs = ordered.len();
            self.backend
                .commit_transactions(ordered)
                .await
                .map_err(|err| anyhow::anyhow!("failed to commit txs: {err}"))?;
            info!(%num_txs, "committed txs");
        }
    }
}

/// Collects one execution window: waits for the first event, then keeps
/// collecting until the feed goes quiet for `min_interval` or the window
/// has been open for `max_interval`.  Returns `None` on shutdown.
async fn collect_window(
    rx: &mut broadcast::Receiver<NewTxsEvent>,
    min_interval: Duration,
    max_interval: Duration,
    guard: &ShutdownGuard,
) -> Option<Vec<NewTxsEvent>> {
    let first = loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Ok(ev) => break ev,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%skipped, "tx feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            },
            _ = guard.wait_for_shutdown() => return None,
        }
    };

    let mut events = vec![first];
    let window_close = Instant::now() + max_interval;
    loop {
        let quiet_close = Instant::now() + min_interval;
        tokio::select! {
            ev = rx.recv() => match ev {
                Ok(ev) => {
                    events.push(ev);
                    if Instant::now() >= window_close {
                        return Some(events);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%skipped, "tx feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Some(events),
            },
            _ = sleep_until(quiet_close.min(window_close)) => return Some(events),
        }
    }
}

/// Service entry point.
pub async fn executor_task<M, O>(
    executor: Executor<M, O>,
    guard: ShutdownGuard,
) -> anyhow::Result<()>
where
    M: MempoolBackend,
    O: Orderer,
{
    executor.run(guard).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_primitives::{Bytes, B256};
    use async_trait::async_trait;
    use keel_engine::{EngineResult, NewTxsEvent};
    use keel_tasks::test_guard;

    use super::*;
    use crate::orderer::{Orderer, OrdererError};

    struct MockBackend {
        tx: broadcast::Sender<NewTxsEvent>,
        committed: Mutex<Vec<Vec<PoolTx>>>,
    }

    impl MockBackend {
        fn new() -> Self {
            let (tx, _) = broadcast::channel(64);
            Self {
                tx,
                committed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MempoolBackend for MockBackend {
        fn subscribe_new_txs(&self) -> broadcast::Receiver<NewTxsEvent> {
            self.tx.subscribe()
        }

        async fn commit_transactions(&self, txs: Vec<PoolTx>) -> EngineResult<()> {
            self.committed.lock().unwrap().push(txs);
            Ok(())
        }
    }

    struct PassthroughOrderer;

    #[async_trait]
    impl Orderer for PassthroughOrderer {
        async fn order_transactions(
            &self,
            txs: Vec<PoolTx>,
        ) -> Result<Vec<PoolTx>, OrdererError> {
            Ok(txs)
        }
    }

    fn tx(b: u8) -> PoolTx {
        PoolTx {
            hash: B256::repeat_byte(b),
            effective_tip: b as u128,
            raw: Bytes::from(vec![b]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_closes_after_quiet_period() {
        let (sender, mut rx) = broadcast::channel(8);
        let guard = test_guard();

        sender.send(NewTxsEvent { txs: vec![tx(1)] }).unwrap();
        sender.send(NewTxsEvent { txs: vec![tx(2)] }).unwrap();

        let events = collect_window(
            &mut rx,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            &guard,
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_commits_windowed_txs() {
        let backend = Arc::new(MockBackend::new());
        let cfg = SequencerConfig {
            enabled: true,
            min_execution_interval_ms: 50,
            max_execution_interval_ms: 500,
        };
        let executor = Executor::new(cfg, backend.clone(), PassthroughOrderer);

        let sender = backend.tx.clone();
        let guard = test_guard();
        let handle = tokio::spawn(async move { executor.run(guard).await });

        tokio::task::yield_now().await;
        sender.send(NewTxsEvent { txs: vec![tx(1), tx(2)] }).unwrap();

        // Let the window close and the commit land.
        for _ in 0..20 {
            tokio::task::yield_now().await;
            if !backend.committed.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let committed = backend.committed.lock().unwrap().clone();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].len(), 2);
        handle.abort();
    }
}
