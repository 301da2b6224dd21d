pub mod electrum;
pub mod htlc;
pub mod wallet;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scale factor between the Lightning leg's base unit (satoshi) and the
/// on-chain leg's native unit. L-BTC models 1:1 value parity with the same
/// base unit, so the factor is one; an EVM-style leg would carry 10^10 here.
pub const ONCHAIN_UNITS_PER_SAT: u64 = 1;

pub fn to_onchain_units(amount_sat: u64) -> u64 {
    amount_sat * ONCHAIN_UNITS_PER_SAT
}

/// Everything the chain client needs to reconstruct one swap's HTLC. Built
/// from the persisted swap record, so watches survive a process restart.
#[derive(Debug, Clone)]
pub struct HtlcParams {
    pub preimage_hash: [u8; 32],
    pub claim_address: String,
    pub timeout_block_height: u32,
}

#[derive(Debug, Clone)]
pub struct LockupOutcome {
    pub txid: String,
    pub amount_sat: u64,
    pub timeout_block_height: u32,
}

/// An observed on-chain claim: the counterparty spent the HTLC and thereby
/// revealed the preimage in public.
#[derive(Debug, Clone)]
pub struct ClaimEvent {
    pub preimage: [u8; 32],
    pub txid: String,
}

/// Live claim watch handle. Dropping it (or calling `unsubscribe`, which is
/// idempotent) tears down the watcher task behind the channel.
pub struct ClaimSubscription {
    events: mpsc::Receiver<ClaimEvent>,
    task: Option<JoinHandle<()>>,
}

impl ClaimSubscription {
    pub fn new(events: mpsc::Receiver<ClaimEvent>, task: JoinHandle<()>) -> Self {
        Self {
            events,
            task: Some(task),
        }
    }

    /// Resolves with the next claim event, or `None` once the watcher task
    /// is gone.
    pub async fn recv(&mut self) -> Option<ClaimEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ClaimSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The on-chain HTLC leg: lock funds under hash + timeout, observe claims.
/// Injected into the orchestrator and the claim monitor so chain-specific
/// detail stays behind this seam.
#[async_trait]
pub trait HtlcChainClient: Send + Sync {
    async fn current_block(&self) -> Result<u32>;

    async fn balance_sat(&self) -> Result<u64>;

    /// Address funds must be locked to for these HTLC parameters.
    async fn lockup_address(&self, params: &HtlcParams) -> Result<String>;

    /// Locks `amount_sat` under the HTLC and waits for one confirmation.
    async fn lockup(&self, params: &HtlcParams, amount_sat: u64) -> Result<LockupOutcome>;

    /// Scans `[from_block, tip]` for a spend of the HTLC revealing the
    /// preimage.
    async fn find_claim(
        &self,
        params: &HtlcParams,
        from_block: u32,
    ) -> Result<Option<ClaimEvent>>;

    /// Live claim watch for the same HTLC.
    async fn subscribe_claims(&self, params: &HtlcParams) -> Result<ClaimSubscription>;
}
