pub mod monitor;
pub mod rpc;
pub mod service;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::chain::HtlcParams;

/// Smallest invoice this service accepts, in satoshi.
pub const MIN_INVOICE_AMOUNT_SAT: u64 = 10_000;

/// Service fee withheld from the locked amount, in parts per million (0.5%).
pub const FEE_RATE_PPM: u64 = 5_000;

/// Blocks between creation and the HTLC becoming refundable (~24h).
pub const TIMEOUT_DELTA_BLOCKS: u32 = 1_440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Pending,
    InvoicePaid,
    Locked,
    Claimed,
    Expired,
    Refunded,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Claimed | SwapStatus::Expired | SwapStatus::Refunded | SwapStatus::Failed
        )
    }
}

/// One swap attempt. `preimage` stays `None` until the counterparty reveals
/// it on-chain and the swap reaches `Claimed`; no private key is ever
/// stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    pub status: SwapStatus,
    pub created_at: i64,
    pub updated_at: i64,

    pub preimage_hash: String,
    pub claim_public_key: String,
    pub claim_address: String,

    pub invoice_amount_sat: u64,
    pub invoice: String,
    pub invoice_paid: bool,

    pub lockup_address: String,
    pub lockup_txid: Option<String>,
    pub lockup_amount_sat: Option<u64>,
    pub timeout_block_height: u32,

    pub claim_txid: Option<String>,
    pub claimed_at: Option<i64>,
    pub preimage: Option<String>,
}

impl SwapRecord {
    /// Rebuilds the on-chain HTLC parameters from the persisted row, so a
    /// claim watch can be re-established after a restart.
    pub fn htlc_params(&self) -> Result<HtlcParams> {
        let bytes = hex::decode(&self.preimage_hash).context("decode preimage hash")?;
        let preimage_hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("preimage hash must be 32 bytes"))?;

        Ok(HtlcParams {
            preimage_hash,
            claim_address: self.claim_address.clone(),
            timeout_block_height: self.timeout_block_height,
        })
    }
}

/// Amount locked on-chain after the service fee: `invoice_amount × (1 − fee)`.
/// Fee math runs in u128 so the full u64 amount range stays exact; a fee
/// rate above 100% clamps to the whole amount.
pub fn lockup_amount_sat(invoice_amount_sat: u64, fee_rate_ppm: u64) -> u64 {
    let fee = (u128::from(invoice_amount_sat) * u128::from(fee_rate_ppm) / 1_000_000)
        .min(u128::from(invoice_amount_sat)) as u64;
    invoice_amount_sat - fee
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_math_at_minimum_amount() {
        assert_eq!(lockup_amount_sat(MIN_INVOICE_AMOUNT_SAT, FEE_RATE_PPM), 9_950);
        assert_eq!(lockup_amount_sat(1_000_000, FEE_RATE_PPM), 995_000);
        // Fee never rounds the lockup up.
        assert!(lockup_amount_sat(10_001, FEE_RATE_PPM) <= 10_001);
    }

    #[test]
    fn fee_math_holds_across_the_full_amount_range() {
        let fee = (u128::from(u64::MAX) * u128::from(FEE_RATE_PPM) / 1_000_000) as u64;
        assert_eq!(lockup_amount_sat(u64::MAX, FEE_RATE_PPM), u64::MAX - fee);
        // A fee rate at or above 100% consumes the whole amount.
        assert_eq!(lockup_amount_sat(10_000, 1_000_000), 0);
        assert_eq!(lockup_amount_sat(10_000, 2_000_000), 0);
    }

    #[test]
    fn terminal_states() {
        assert!(!SwapStatus::Pending.is_terminal());
        assert!(!SwapStatus::InvoicePaid.is_terminal());
        assert!(!SwapStatus::Locked.is_terminal());
        assert!(SwapStatus::Claimed.is_terminal());
        assert!(SwapStatus::Expired.is_terminal());
        assert!(SwapStatus::Refunded.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
    }
}
