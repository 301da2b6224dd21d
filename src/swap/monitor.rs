use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::chain::{ClaimEvent, ClaimSubscription, HtlcChainClient, HtlcParams};
use crate::lightning::hold::HoldInvoiceClient;
use crate::swap::store::SqliteSwapStore;
use crate::swap::{SwapStatus, now_unix};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Cadence of the historical-scan fallback detector.
    pub poll_interval: Duration,
    /// How far back the fallback scans from the current tip.
    pub poll_window_blocks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            poll_window_blocks: 1_000,
        }
    }
}

/// Watches locked swaps for the on-chain claim that reveals the preimage,
/// then settles the hold invoice with it. Each watch races a live
/// subscription against a bounded poll; the first detection wins and the
/// loser is cancelled.
#[derive(Clone)]
pub struct ClaimMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    cfg: MonitorConfig,
    ln: Arc<dyn HoldInvoiceClient>,
    chain: Arc<dyn HtlcChainClient>,
    store: Arc<Mutex<SqliteSwapStore>>,
    watches: Mutex<HashMap<String, JoinHandle<()>>>,
    running: AtomicBool,
}

impl ClaimMonitor {
    pub fn new(
        cfg: MonitorConfig,
        ln: Arc<dyn HoldInvoiceClient>,
        chain: Arc<dyn HtlcChainClient>,
        store: Arc<Mutex<SqliteSwapStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                cfg,
                ln,
                chain,
                store,
                watches: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Idempotent. Re-establishes a watch for every persisted locked swap,
    /// so claims that happened while the process was down are still found
    /// through the historical-scan path.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let locked = {
            let store = self.inner.store.lock().expect("store mutex poisoned");
            store
                .list_swaps_by_status(SwapStatus::Locked)
                .context("scan locked swaps")?
        };

        tracing::info!(locked_swaps = locked.len(), "claim monitor started");

        for record in locked {
            match record.htlc_params() {
                Ok(params) => self.watch_swap_claim(record.swap_id, params),
                Err(err) => {
                    tracing::error!(swap_id = %record.swap_id, error = %err, "unwatchable locked swap");
                }
            }
        }

        Ok(())
    }

    /// Idempotent. Aborts every watch task, which tears down its claim
    /// subscription and poll timer.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut watches = self.inner.watches.lock().expect("watches mutex poisoned");
        for (swap_id, task) in watches.drain() {
            task.abort();
            tracing::debug!(swap_id = %swap_id, "claim watch cancelled");
        }

        tracing::info!("claim monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn active_watch_count(&self) -> usize {
        self.inner
            .watches
            .lock()
            .expect("watches mutex poisoned")
            .len()
    }

    /// Starts watching one swap. A second registration for the same swap is
    /// a no-op, as is any registration while the monitor is stopped, so a
    /// lockup finishing concurrently with `stop()` cannot leave a live
    /// watch behind. `stop()` flips `running` before draining the map;
    /// holding the map lock across this check makes the two orderings safe.
    pub fn watch_swap_claim(&self, swap_id: String, params: HtlcParams) {
        let mut watches = self.inner.watches.lock().expect("watches mutex poisoned");
        if !self.inner.running.load(Ordering::SeqCst) {
            tracing::debug!(swap_id = %swap_id, "monitor stopped, claim watch not registered");
            return;
        }
        if watches.contains_key(&swap_id) {
            return;
        }

        let monitor = self.clone();
        let id = swap_id.clone();
        let task = tokio::spawn(async move {
            let event = monitor.detect_claim(&id, &params).await;

            if let Err(err) = monitor.handle_claim(&id, event).await {
                tracing::error!(swap_id = %id, error = format!("{err:#}"), "claim handling failed");
            }

            monitor
                .inner
                .watches
                .lock()
                .expect("watches mutex poisoned")
                .remove(&id);
        });

        watches.insert(swap_id, task);
    }

    /// Races the live subscription against the bounded historical poll.
    /// Resolves with the first detection; returning drops the subscription
    /// and the poll timer, cancelling the losing detector. Detection errors
    /// are retried indefinitely, this is the one place the engine retries.
    async fn detect_claim(&self, swap_id: &str, params: &HtlcParams) -> ClaimEvent {
        let mut subscription: Option<ClaimSubscription> =
            match self.inner.chain.subscribe_claims(params).await {
                Ok(sub) => Some(sub),
                Err(err) => {
                    tracing::warn!(swap_id = %swap_id, error = %err, "claim subscription unavailable, poll only");
                    None
                }
            };

        let mut ticker = tokio::time::interval(self.inner.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = next_subscription_event(&mut subscription) => match event {
                    Some(event) => {
                        tracing::debug!(swap_id = %swap_id, "claim detected via live subscription");
                        return event;
                    }
                    None => {
                        tracing::warn!(swap_id = %swap_id, "claim subscription closed, poll only");
                        subscription = None;
                    }
                },
                _ = ticker.tick() => {
                    match self.poll_once(params).await {
                        Ok(Some(event)) => {
                            tracing::debug!(swap_id = %swap_id, "claim detected via historical scan");
                            return event;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(swap_id = %swap_id, error = format!("{err:#}"), "claim poll failed, retrying");
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&self, params: &HtlcParams) -> Result<Option<ClaimEvent>> {
        let tip = self.inner.chain.current_block().await?;
        let from_block = tip.saturating_sub(self.inner.cfg.poll_window_blocks);
        self.inner.chain.find_claim(params, from_block).await
    }

    /// Records the claim and settles the invoice. Idempotent: a duplicate
    /// detection of an already claimed swap is a no-op, so at most one
    /// settlement is ever attempted.
    pub async fn handle_claim(&self, swap_id: &str, event: ClaimEvent) -> Result<()> {
        {
            let mut store = self.inner.store.lock().expect("store mutex poisoned");
            let record = store
                .get_swap(swap_id)
                .context("load swap")?
                .with_context(|| format!("swap not found: {swap_id}"))?;

            if record.status == SwapStatus::Claimed {
                tracing::debug!(swap_id = %swap_id, "claim already recorded");
                return Ok(());
            }

            store
                .set_claimed(
                    swap_id,
                    &event.txid,
                    now_unix(),
                    &hex::encode(event.preimage),
                )
                .context("record claim")?;
        }

        tracing::info!(swap_id = %swap_id, claim_txid = %event.txid, "on-chain claim observed");

        self.settle_invoice(swap_id, event.preimage).await;
        Ok(())
    }

    /// Settlement failure is bookkeeping only: the counterparty already has
    /// the locked funds and the preimage is public, so the swap is marked
    /// failed and the error logged.
    async fn settle_invoice(&self, swap_id: &str, preimage: [u8; 32]) {
        match self.inner.ln.settle_invoice(preimage).await {
            Ok(()) => {
                tracing::info!(swap_id = %swap_id, "hold invoice settled");
            }
            Err(err) => {
                tracing::warn!(swap_id = %swap_id, error = format!("{err:#}"), "hold invoice settlement failed");
                let mut store = self.inner.store.lock().expect("store mutex poisoned");
                if let Err(err) = store.update_status(swap_id, SwapStatus::Failed) {
                    tracing::error!(swap_id = %swap_id, error = %err, "failed to mark swap failed");
                }
            }
        }
    }
}

async fn next_subscription_event(
    subscription: &mut Option<ClaimSubscription>,
) -> Option<ClaimEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
