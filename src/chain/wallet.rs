use std::path::Path;

use anyhow::{Context as _, Result};
use lwk_common::Signer as _;
use lwk_signer::SwSigner;
use lwk_wollet::blocking::BlockchainBackend as _;
use lwk_wollet::{
    ElectrumClient, ElectrumUrl, ElementsNetwork, History, Wollet, WolletDescriptor,
    elements::{Address, AssetId, Script, Transaction, Txid, confidential},
    full_scan_with_electrum_client,
};

/// Electrum-backed wallet holding the funds this service locks into HTLCs.
pub struct OnchainWallet {
    signer: SwSigner,
    wollet: Wollet,
    client: ElectrumClient,
    network: ElementsNetwork,
}

impl OnchainWallet {
    pub fn new(
        mnemonic: &str,
        slip77_key: &str,
        electrum_url: &str,
        persist_dir: &Path,
        network: ElementsNetwork,
    ) -> Result<Self> {
        let signer = SwSigner::new(mnemonic, false).context("create SwSigner")?;
        let xpub = signer.xpub();

        let desc_str = format!("ct(slip77({slip77_key}),elwpkh({xpub}/*))");
        let descriptor: WolletDescriptor = desc_str.parse().context("parse wollet descriptor")?;

        let wollet =
            Wollet::with_fs_persist(network, descriptor, persist_dir).context("create wollet")?;

        let client = electrum_client(electrum_url).context("create electrum client")?;

        let mut wallet = Self {
            signer,
            wollet,
            client,
            network,
        };
        wallet.sync().context("initial sync")?;
        Ok(wallet)
    }

    pub fn network(&self) -> ElementsNetwork {
        self.network
    }

    pub fn policy_asset(&self) -> AssetId {
        self.wollet.policy_asset()
    }

    pub fn balance_sat(&self) -> Result<u64> {
        let balances = self.wollet.balance().context("get wollet balance")?;
        Ok(*balances.get(&self.policy_asset()).unwrap_or(&0))
    }

    pub fn tip_height(&self) -> u32 {
        self.wollet.tip().height()
    }

    pub fn address_at(&self, index: u32) -> Result<Address> {
        Ok(self
            .wollet
            .address(Some(index))
            .context("get wollet address")?
            .address()
            .clone())
    }

    pub fn sync(&mut self) -> Result<()> {
        full_scan_with_electrum_client(&mut self.wollet, &mut self.client)
            .context("sync wollet via electrum")
    }

    /// Funds the HTLC address with a single explicit L-BTC output and
    /// broadcasts the transaction. Returns the txid and the HTLC vout.
    pub fn build_and_broadcast_lockup(
        &mut self,
        htlc_address: &Address,
        amount_sat: u64,
    ) -> Result<(Txid, u32)> {
        self.sync().context("sync wallet before building lockup")?;

        let policy_asset = self.policy_asset();

        let mut pset = self
            .wollet
            .tx_builder()
            .add_explicit_recipient(htlc_address, amount_sat, policy_asset)
            .context("add htlc lockup output")?
            .finish()
            .context("finalize lockup pset")?;

        let sigs = self.signer.sign(&mut pset).context("sign lockup pset")?;
        anyhow::ensure!(sigs > 0, "no signatures added for lockup");

        let tx = self
            .wollet
            .finalize(&mut pset)
            .context("finalize lockup tx")?;
        let txid = self.client.broadcast(&tx).context("broadcast lockup tx")?;

        let htlc_spk = htlc_address.script_pubkey();
        let vout = tx
            .output
            .iter()
            .position(|output| {
                output.script_pubkey == htlc_spk
                    && matches!(output.asset, confidential::Asset::Explicit(a) if a == policy_asset)
            })
            .context("htlc lockup output not found")?;

        Ok((txid, vout as u32))
    }

    /// Confirmed/unconfirmed history entries touching a script.
    pub fn script_history(&self, script_pubkey: &Script) -> Result<Vec<History>> {
        let mut histories = self
            .client
            .get_scripts_history(&[script_pubkey])
            .context("get script history")?;
        Ok(histories.pop().unwrap_or_default())
    }

    pub fn transaction(&self, txid: &Txid) -> Result<Transaction> {
        let mut txs = self
            .client
            .get_transactions(&[*txid])
            .context("get transaction")?;
        txs.pop().context("transaction not found")
    }

    pub fn tx_confirmations_for_script(
        &self,
        script_pubkey: &Script,
        txid: &Txid,
    ) -> Result<Option<u32>> {
        let history = self.script_history(script_pubkey)?;
        let Some(entry) = history.into_iter().find(|h| &h.txid == txid) else {
            return Ok(None);
        };

        if entry.height <= 0 {
            return Ok(Some(0));
        }

        let height = u32::try_from(entry.height).context("history height must be positive")?;
        let tip = self.tip_height();
        if tip < height {
            return Ok(Some(0));
        }
        Ok(Some(tip - height + 1))
    }

}

fn electrum_client(url: &str) -> Result<ElectrumClient> {
    let endpoint = url.trim_start_matches("tcp://");
    let electrum_url = ElectrumUrl::new(endpoint, false, false)
        .with_context(|| format!("parse electrum url {endpoint}"))?;
    ElectrumClient::new(&electrum_url).context("create electrum client")
}
