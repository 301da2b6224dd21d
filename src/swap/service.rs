use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use uuid::Uuid;

use crate::chain::{HtlcChainClient, HtlcParams, to_onchain_units};
use crate::lightning::hold::HoldInvoiceClient;
use crate::lightning::invoice::ensure_invoice_terms;
use crate::swap::monitor::ClaimMonitor;
use crate::swap::store::SqliteSwapStore;
use crate::swap::{
    FEE_RATE_PPM, MIN_INVOICE_AMOUNT_SAT, SwapRecord, SwapStatus, TIMEOUT_DELTA_BLOCKS,
    lockup_amount_sat, now_unix,
};

#[derive(Debug, Clone)]
pub struct SwapServiceConfig {
    pub min_invoice_amount_sat: u64,
    pub fee_rate_ppm: u64,
    pub timeout_delta_blocks: u32,
    /// How long an unpaid hold invoice is waited on before the swap expires.
    pub invoice_wait: Duration,
}

impl Default for SwapServiceConfig {
    fn default() -> Self {
        Self {
            min_invoice_amount_sat: MIN_INVOICE_AMOUNT_SAT,
            fee_rate_ppm: FEE_RATE_PPM,
            timeout_delta_blocks: TIMEOUT_DELTA_BLOCKS,
            invoice_wait: Duration::from_secs(3_600),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("invalid swap request: {0}")]
    InvalidRequest(String),
    #[error("swap not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct CreateReverseSwap {
    pub invoice_amount_sat: u64,
    pub preimage_hash: String,
    pub claim_public_key: String,
    pub claim_address: String,
}

/// Everything the caller gets back at creation. Deliberately contains no
/// secret material of either leg.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSwap {
    pub swap_id: String,
    pub invoice: String,
    pub lockup_address: String,
    pub timeout_block_height: u32,
    pub onchain_amount_sat: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub healthy: bool,
    pub block_height: u32,
    pub active_claim_watches: usize,
}

/// Public entry point of the swap engine. Creates swaps and drives each one
/// through invoice wait → on-chain lockup → claim watch registration, with
/// every post-creation step running as an independent task.
#[derive(Clone)]
pub struct ReverseSwapService {
    cfg: SwapServiceConfig,
    ln: Arc<dyn HoldInvoiceClient>,
    chain: Arc<dyn HtlcChainClient>,
    store: Arc<Mutex<SqliteSwapStore>>,
    monitor: ClaimMonitor,
}

impl ReverseSwapService {
    pub fn new(
        cfg: SwapServiceConfig,
        ln: Arc<dyn HoldInvoiceClient>,
        chain: Arc<dyn HtlcChainClient>,
        store: Arc<Mutex<SqliteSwapStore>>,
        monitor: ClaimMonitor,
    ) -> Self {
        Self {
            cfg,
            ln,
            chain,
            store,
            monitor,
        }
    }

    pub async fn create_reverse_swap(
        &self,
        req: CreateReverseSwap,
    ) -> Result<CreatedSwap, SwapError> {
        let preimage_hash = parse_preimage_hash(&req.preimage_hash)?;
        validate_claim_public_key(&req.claim_public_key)?;

        if req.claim_address.trim().is_empty() {
            return Err(SwapError::InvalidRequest("claim_address is required".into()));
        }

        if req.invoice_amount_sat < self.cfg.min_invoice_amount_sat {
            return Err(SwapError::InvalidRequest(format!(
                "invoice_amount_sat must be at least {}",
                self.cfg.min_invoice_amount_sat
            )));
        }

        let preimage_hash_hex = req.preimage_hash.to_lowercase();
        {
            let store = self.store.lock().expect("store mutex poisoned");
            if store
                .get_swap_by_preimage_hash(&preimage_hash_hex)
                .context("check preimage hash reuse")?
                .is_some()
            {
                return Err(SwapError::InvalidRequest(
                    "preimage_hash already used by another swap".into(),
                ));
            }
        }

        let tip = self
            .chain
            .current_block()
            .await
            .context("get current block")?;
        let timeout_block_height = tip.saturating_add(self.cfg.timeout_delta_blocks);

        let params = HtlcParams {
            preimage_hash,
            claim_address: req.claim_address.clone(),
            timeout_block_height,
        };

        let lockup_address = self
            .chain
            .lockup_address(&params)
            .await
            .map_err(|e| SwapError::InvalidRequest(format!("claim address rejected: {e:#}")))?;

        let swap_id = Uuid::new_v4().to_string();
        let held = self
            .ln
            .create_hold_invoice(
                req.invoice_amount_sat,
                preimage_hash,
                &format!("reverse swap {swap_id}"),
            )
            .await
            .context("create hold invoice")?;
        ensure_invoice_terms(
            &held.payment_request,
            &preimage_hash,
            req.invoice_amount_sat.saturating_mul(1_000),
        )
        .context("verify hold invoice terms")?;

        let onchain_amount_sat = to_onchain_units(lockup_amount_sat(
            req.invoice_amount_sat,
            self.cfg.fee_rate_ppm,
        ));

        let now = now_unix();
        let record = SwapRecord {
            swap_id: swap_id.clone(),
            status: SwapStatus::Pending,
            created_at: now,
            updated_at: now,
            preimage_hash: preimage_hash_hex,
            claim_public_key: req.claim_public_key.to_lowercase(),
            claim_address: req.claim_address,
            invoice_amount_sat: req.invoice_amount_sat,
            invoice: held.payment_request.clone(),
            invoice_paid: false,
            lockup_address: lockup_address.clone(),
            lockup_txid: None,
            lockup_amount_sat: None,
            timeout_block_height,
            claim_txid: None,
            claimed_at: None,
            preimage: None,
        };

        {
            let mut store = self.store.lock().expect("store mutex poisoned");
            if let Err(err) = store.insert_swap(&record) {
                // The unique index backstops the pre-check when two creations
                // race on the same hash; report it like the pre-check does.
                if crate::swap::store::is_constraint_violation(&err) {
                    return Err(SwapError::InvalidRequest(
                        "preimage_hash already used by another swap".into(),
                    ));
                }
                return Err(err.context("persist swap").into());
            }
        }

        tracing::info!(
            swap_id = %swap_id,
            invoice_amount_sat = req.invoice_amount_sat,
            timeout_block_height,
            "reverse swap created"
        );

        let service = self.clone();
        let id = swap_id.clone();
        tokio::spawn(async move {
            service.monitor_invoice_payment(id, preimage_hash).await;
        });

        Ok(CreatedSwap {
            swap_id,
            invoice: held.payment_request,
            lockup_address,
            timeout_block_height,
            onchain_amount_sat,
        })
    }

    pub fn get_swap(&self, swap_id: &str) -> Result<SwapRecord, SwapError> {
        let store = self.store.lock().expect("store mutex poisoned");
        store
            .get_swap(swap_id)
            .context("load swap")?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    pub fn list_swaps(&self) -> Result<Vec<SwapRecord>, SwapError> {
        let store = self.store.lock().expect("store mutex poisoned");
        Ok(store.list_swaps().context("list swaps")?)
    }

    pub async fn health(&self) -> Result<Health, SwapError> {
        let block_height = self.chain.current_block().await.context("get current block")?;
        Ok(Health {
            healthy: self.monitor.is_running(),
            block_height,
            active_claim_watches: self.monitor.active_watch_count(),
        })
    }

    /// Waits for the hold invoice with a bounded timeout. Expiry stops the
    /// swap before any funds were locked; acceptance moves on to lockup.
    async fn monitor_invoice_payment(self, swap_id: String, preimage_hash: [u8; 32]) {
        match self
            .ln
            .wait_for_invoice_accepted(preimage_hash, self.cfg.invoice_wait)
            .await
        {
            Ok(true) => {
                let paid = {
                    let mut store = self.store.lock().expect("store mutex poisoned");
                    store.set_invoice_paid(&swap_id)
                };
                match paid {
                    Ok(()) => {
                        tracing::info!(swap_id = %swap_id, "hold invoice accepted");
                        self.perform_lockup(&swap_id).await;
                    }
                    Err(err) => {
                        tracing::error!(swap_id = %swap_id, error = format!("{err:#}"), "record invoice payment failed");
                        self.mark_failed(&swap_id);
                    }
                }
            }
            Ok(false) => {
                tracing::info!(swap_id = %swap_id, "invoice not paid in time, swap expired");
                let mut store = self.store.lock().expect("store mutex poisoned");
                if let Err(err) = store.update_status(&swap_id, SwapStatus::Expired) {
                    tracing::error!(swap_id = %swap_id, error = %err, "failed to expire swap");
                }
            }
            Err(err) => {
                tracing::warn!(swap_id = %swap_id, error = format!("{err:#}"), "invoice wait failed");
                self.mark_failed(&swap_id);
            }
        }
    }

    /// Locks the post-fee amount on-chain and hands the swap to the claim
    /// monitor. A failed lockup is terminal; the already-held invoice is not
    /// cancelled automatically and needs operator attention.
    async fn perform_lockup(&self, swap_id: &str) {
        let outcome = async {
            let record = {
                let store = self.store.lock().expect("store mutex poisoned");
                store
                    .get_swap(swap_id)
                    .context("load swap")?
                    .with_context(|| format!("swap not found: {swap_id}"))?
            };

            let amount_sat = lockup_amount_sat(record.invoice_amount_sat, self.cfg.fee_rate_ppm);
            let params = record.htlc_params()?;
            let outcome = self
                .chain
                .lockup(&params, amount_sat)
                .await
                .context("lock funds on-chain")?;

            {
                let mut store = self.store.lock().expect("store mutex poisoned");
                store
                    .set_locked(swap_id, &outcome.txid, outcome.amount_sat)
                    .context("record lockup")?;
            }

            tracing::info!(
                swap_id = %swap_id,
                lockup_txid = %outcome.txid,
                lockup_amount_sat = outcome.amount_sat,
                timeout_block_height = outcome.timeout_block_height,
                "on-chain funds locked"
            );

            self.monitor.watch_swap_claim(swap_id.to_string(), params);
            anyhow::Ok(())
        }
        .await;

        if let Err(err) = outcome {
            tracing::warn!(
                swap_id = %swap_id,
                error = format!("{err:#}"),
                "lockup failed, hold invoice remains held"
            );
            self.mark_failed(swap_id);
        }
    }

    fn mark_failed(&self, swap_id: &str) {
        let mut store = self.store.lock().expect("store mutex poisoned");
        if let Err(err) = store.update_status(swap_id, SwapStatus::Failed) {
            tracing::error!(swap_id = %swap_id, error = %err, "failed to mark swap failed");
        }
    }
}

fn parse_preimage_hash(s: &str) -> Result<[u8; 32], SwapError> {
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SwapError::InvalidRequest(
            "preimage_hash must be exactly 64 hex characters".into(),
        ));
    }

    let bytes = hex::decode(s)
        .map_err(|e| SwapError::InvalidRequest(format!("preimage_hash is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| SwapError::InvalidRequest("preimage_hash must be 32 bytes".into()))
}

fn validate_claim_public_key(s: &str) -> Result<(), SwapError> {
    let valid = s.len() == 66
        && s.bytes().all(|b| b.is_ascii_hexdigit())
        && (s.starts_with("02") || s.starts_with("03"));
    if !valid {
        return Err(SwapError::InvalidRequest(
            "claim_public_key must be a 33-byte compressed key in hex".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_hash_must_be_64_hex_chars() {
        assert!(parse_preimage_hash(&"ab".repeat(32)).is_ok());
        assert!(parse_preimage_hash(&"ab".repeat(31)).is_err());
        assert!(parse_preimage_hash(&format!("{}x", "ab".repeat(31).as_str())).is_err());
        assert!(parse_preimage_hash(&"gg".repeat(32)).is_err());
        assert!(parse_preimage_hash("").is_err());
    }

    #[test]
    fn claim_public_key_must_be_compressed_hex() {
        let key = format!("02{}", "11".repeat(32));
        assert!(validate_claim_public_key(&key).is_ok());
        let key = format!("03{}", "11".repeat(32));
        assert!(validate_claim_public_key(&key).is_ok());
        let key = format!("04{}", "11".repeat(32));
        assert!(validate_claim_public_key(&key).is_err());
        assert!(validate_claim_public_key("02abcd").is_err());
    }
}
