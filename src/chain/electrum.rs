use std::str::FromStr as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use lwk_wollet::elements::{Address, AddressParams, Script, Txid};
use tokio::sync::mpsc;

use super::htlc::{HtlcScript, extract_claim_preimage, pubkey_hash160_from_p2wpkh_address};
use super::wallet::OnchainWallet;
use super::{ClaimEvent, ClaimSubscription, HtlcChainClient, HtlcParams, LockupOutcome};

/// HTLC chain client over the Electrum-backed wallet. Claims are detected by
/// scanning the HTLC script's history for a spend whose witness reveals the
/// preimage; the live subscription is a dedicated watcher task doing the
/// same scan on a short cadence.
pub struct ElectrumHtlcClient {
    wallet: Arc<Mutex<OnchainWallet>>,
    refund_pubkey_hash160: [u8; 20],
    address_params: &'static AddressParams,
    confirmation_timeout: Duration,
    subscribe_interval: Duration,
}

impl ElectrumHtlcClient {
    pub fn new(wallet: Arc<Mutex<OnchainWallet>>, refund_key_index: u32) -> Result<Self> {
        let (refund_pubkey_hash160, address_params) = {
            let wallet = wallet.lock().expect("wallet mutex poisoned");
            let refund_address = wallet
                .address_at(refund_key_index)
                .context("get refund address")?;
            let hash = pubkey_hash160_from_p2wpkh_address(&refund_address)
                .context("extract refund pubkey hash")?;
            (hash, wallet.network().address_params())
        };

        Ok(Self {
            wallet,
            refund_pubkey_hash160,
            address_params,
            confirmation_timeout: Duration::from_secs(300),
            subscribe_interval: Duration::from_secs(5),
        })
    }

    fn htlc_script(&self, params: &HtlcParams) -> Result<HtlcScript> {
        let claim_address =
            Address::from_str(&params.claim_address).context("parse claim address")?;
        anyhow::ensure!(
            claim_address.params == self.address_params,
            "claim address network mismatch"
        );

        let claim_pubkey_hash160 = pubkey_hash160_from_p2wpkh_address(&claim_address)
            .context("claim address must be P2WPKH")?;

        Ok(HtlcScript {
            preimage_hash: params.preimage_hash,
            claim_pubkey_hash160,
            refund_pubkey_hash160: self.refund_pubkey_hash160,
            timeout_block_height: params.timeout_block_height,
        })
    }
}

#[async_trait]
impl HtlcChainClient for ElectrumHtlcClient {
    async fn current_block(&self) -> Result<u32> {
        let wallet = self.wallet.clone();
        tokio::task::spawn_blocking(move || {
            let mut wallet = wallet.lock().expect("wallet mutex poisoned");
            wallet.sync().context("sync wallet")?;
            Ok(wallet.tip_height())
        })
        .await
        .context("join chain task")?
    }

    async fn balance_sat(&self) -> Result<u64> {
        let wallet = self.wallet.clone();
        tokio::task::spawn_blocking(move || {
            let mut wallet = wallet.lock().expect("wallet mutex poisoned");
            wallet.sync().context("sync wallet")?;
            wallet.balance_sat()
        })
        .await
        .context("join chain task")?
    }

    async fn lockup_address(&self, params: &HtlcParams) -> Result<String> {
        let script = self.htlc_script(params)?;
        Ok(script.p2wsh_address(self.address_params).to_string())
    }

    async fn lockup(&self, params: &HtlcParams, amount_sat: u64) -> Result<LockupOutcome> {
        let script = self.htlc_script(params)?;
        let htlc_address = script.p2wsh_address(self.address_params);
        let timeout_block_height = params.timeout_block_height;
        let confirmation_timeout = self.confirmation_timeout;
        let wallet = self.wallet.clone();

        tokio::task::spawn_blocking(move || {
            // Broadcast under the lock; the confirmation wait re-acquires it
            // per poll so other swaps and the health probe keep moving.
            let txid = {
                let mut wallet = wallet.lock().expect("wallet mutex poisoned");
                let (txid, _vout) = wallet
                    .build_and_broadcast_lockup(&htlc_address, amount_sat)
                    .context("fund htlc")?;
                txid
            };

            wait_for_script_confirmations(
                &wallet,
                &htlc_address.script_pubkey(),
                &txid,
                1,
                confirmation_timeout,
            )
            .context("wait lockup confirmation")?;

            Ok(LockupOutcome {
                txid: txid.to_string(),
                amount_sat,
                timeout_block_height,
            })
        })
        .await
        .context("join chain task")?
    }

    async fn find_claim(
        &self,
        params: &HtlcParams,
        from_block: u32,
    ) -> Result<Option<ClaimEvent>> {
        let script = self.htlc_script(params)?;
        let witness_script = script.witness_script();
        let htlc_spk = script.p2wsh_address(self.address_params).script_pubkey();
        let preimage_hash = params.preimage_hash;
        let wallet = self.wallet.clone();

        tokio::task::spawn_blocking(move || {
            scan_for_claim(&wallet, &htlc_spk, &witness_script, &preimage_hash, from_block)
        })
        .await
        .context("join chain task")?
    }

    async fn subscribe_claims(&self, params: &HtlcParams) -> Result<ClaimSubscription> {
        let script = self.htlc_script(params)?;
        let witness_script = script.witness_script();
        let htlc_spk = script.p2wsh_address(self.address_params).script_pubkey();
        let preimage_hash = params.preimage_hash;
        let wallet = self.wallet.clone();
        let interval = self.subscribe_interval;

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            loop {
                let wallet = wallet.clone();
                let htlc_spk = htlc_spk.clone();
                let witness_script = witness_script.clone();

                let scan = tokio::task::spawn_blocking(move || {
                    scan_for_claim(&wallet, &htlc_spk, &witness_script, &preimage_hash, 0)
                })
                .await;

                match scan {
                    Ok(Ok(Some(event))) => {
                        let _ = tx.send(event).await;
                        return;
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "claim watch scan failed, retrying");
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "claim watch join failed, retrying");
                    }
                }

                tokio::time::sleep(interval).await;
            }
        });

        Ok(ClaimSubscription::new(rx, task))
    }
}

/// Blocking confirmation wait. Takes the wallet lock once per iteration and
/// sleeps unlocked in between.
fn wait_for_script_confirmations(
    wallet: &Arc<Mutex<OnchainWallet>>,
    script_pubkey: &Script,
    txid: &Txid,
    min_confs: u32,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        let confs = {
            let mut wallet = wallet.lock().expect("wallet mutex poisoned");
            wallet.sync().context("sync wallet")?;
            wallet
                .tx_confirmations_for_script(script_pubkey, txid)
                .context("get tx confirmations")?
        };

        if let Some(confs) = confs
            && confs >= min_confs
        {
            return Ok(());
        }

        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for confirmations: txid={txid} min_confs={min_confs}");
        }

        std::thread::sleep(Duration::from_millis(500));
    }
}

/// Blocking scan of the HTLC script history. Mempool entries (height <= 0)
/// are always inspected; confirmed entries only inside the window.
fn scan_for_claim(
    wallet: &Arc<Mutex<OnchainWallet>>,
    htlc_spk: &Script,
    witness_script: &Script,
    preimage_hash: &[u8; 32],
    from_block: u32,
) -> Result<Option<ClaimEvent>> {
    let mut wallet = wallet.lock().expect("wallet mutex poisoned");
    wallet.sync().context("sync wallet")?;

    let history = wallet.script_history(htlc_spk)?;
    for entry in history {
        if entry.height > 0 && (entry.height as u32) < from_block {
            continue;
        }

        let tx = wallet
            .transaction(&entry.txid)
            .with_context(|| format!("fetch history tx {}", entry.txid))?;

        if let Some(preimage) = extract_claim_preimage(&tx, witness_script, preimage_hash) {
            return Ok(Some(ClaimEvent {
                preimage,
                txid: entry.txid.to_string(),
            }));
        }
    }

    Ok(None)
}
