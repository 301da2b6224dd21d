use anyhow::{Context as _, Result};
use lwk_wollet::elements::bitcoin::hashes::{Hash as _, sha256};
use lwk_wollet::elements::bitcoin::secp256k1::Message as BitcoinMessage;
use lwk_wollet::elements::bitcoin::secp256k1::PublicKey as BitcoinPublicKey;
use lwk_wollet::elements::bitcoin::secp256k1::Secp256k1 as BitcoinSecp256k1;
use lwk_wollet::elements::bitcoin::secp256k1::SecretKey as BitcoinSecretKey;
use lwk_wollet::elements::bitcoin::secp256k1::ecdsa::Signature as BitcoinEcdsaSignature;
use lwk_wollet::elements::confidential::{Asset, Nonce, Value};
use lwk_wollet::elements::opcodes;
use lwk_wollet::elements::script::{Builder, Script};
use lwk_wollet::elements::sighash::SighashCache;
use lwk_wollet::elements::{
    Address, AddressParams, AssetId, EcdsaSighashType, LockTime, OutPoint, Sequence, Transaction,
    TxIn, TxInWitness, TxOut, TxOutWitness, Txid,
};

/// One swap's hash-time-locked contract. The claim branch pays whoever can
/// present a 32-byte preimage of `preimage_hash` plus a signature for the
/// claim key; after `timeout_block_height` the refund branch pays the
/// service's refund key.
#[derive(Debug, Clone)]
pub struct HtlcScript {
    pub preimage_hash: [u8; 32],
    pub claim_pubkey_hash160: [u8; 20],
    pub refund_pubkey_hash160: [u8; 20],
    pub timeout_block_height: u32,
}

impl HtlcScript {
    pub fn witness_script(&self) -> Script {
        Builder::new()
            .push_opcode(opcodes::all::OP_IF)
            .push_opcode(opcodes::all::OP_SIZE)
            .push_int(32)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_SHA256)
            .push_slice(&self.preimage_hash)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&self.claim_pubkey_hash160)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(self.timeout_block_height as i64)
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&self.refund_pubkey_hash160)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ENDIF)
            .into_script()
    }

    pub fn p2wsh_address(&self, params: &'static AddressParams) -> Address {
        Address::p2wsh(&self.witness_script(), None, params)
    }
}

/// The confirmed lockup output the HTLC transactions spend.
#[derive(Debug, Clone)]
pub struct HtlcUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value_sat: u64,
}

pub fn pubkey_hash160_from_p2wpkh_address(address: &Address) -> Result<[u8; 20]> {
    pubkey_hash160_from_p2wpkh_script(&address.script_pubkey())
}

pub fn pubkey_hash160_from_p2wpkh_script(script_pubkey: &Script) -> Result<[u8; 20]> {
    let bytes = script_pubkey.as_bytes();
    if bytes.len() != 22 || bytes[0] != 0x00 || bytes[1] != 0x14 {
        anyhow::bail!("expected P2WPKH script_pubkey (0x0014..), got {script_pubkey:?}");
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[2..22]);
    Ok(out)
}

pub fn sha256_preimage(preimage: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}

/// Pulls the revealed preimage out of a transaction spending the HTLC. The
/// claim witness carries the full witness script as its last element, so a
/// spend of this contract is recognized by that element alone.
pub fn extract_claim_preimage(
    tx: &Transaction,
    witness_script: &Script,
    preimage_hash: &[u8; 32],
) -> Option<[u8; 32]> {
    let script_bytes = witness_script.as_bytes();

    for input in &tx.input {
        let witness = &input.witness.script_witness;
        if witness.last().map(Vec::as_slice) != Some(script_bytes) {
            continue;
        }

        for item in witness {
            if item.len() != 32 {
                continue;
            }
            let mut candidate = [0u8; 32];
            candidate.copy_from_slice(item);
            if &sha256_preimage(&candidate) == preimage_hash {
                return Some(candidate);
            }
        }
    }

    None
}

/// Builds the transaction that sweeps the HTLC with the preimage. The engine
/// never sends this itself; it exists for the counterparty tooling and for
/// exercising claim detection.
pub fn claim_tx(
    witness_script: &Script,
    utxo: &HtlcUtxo,
    policy_asset: AssetId,
    destination: &Address,
    claim_secret_key: &BitcoinSecretKey,
    preimage: [u8; 32],
    fee_sats: u64,
) -> Result<Transaction> {
    anyhow::ensure!(
        fee_sats < utxo.value_sat,
        "fee_sats must be less than the locked value"
    );

    let destination_spk = destination.script_pubkey();
    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: vec![htlc_input(utxo, Sequence::MAX)],
        output: vec![
            TxOut {
                asset: Asset::Explicit(policy_asset),
                value: Value::Explicit(utxo.value_sat - fee_sats),
                nonce: Nonce::Null,
                script_pubkey: destination_spk,
                witness: TxOutWitness::default(),
            },
            TxOut::new_fee(fee_sats, policy_asset),
        ],
    };

    let secp = BitcoinSecp256k1::new();
    let sig = sign_htlc_input(&secp, &tx, witness_script, utxo.value_sat, claim_secret_key)
        .context("sign claim input")?;
    let claim_pubkey = BitcoinPublicKey::from_secret_key(&secp, claim_secret_key).serialize();

    tx.input[0].witness.script_witness = vec![
        sig,
        claim_pubkey.to_vec(),
        preimage.to_vec(),
        vec![1u8],
        witness_script.to_bytes(),
    ];

    Ok(tx)
}

/// Builds the timeout-branch transaction returning locked funds to the
/// service once `timeout_block_height` is reached. Never broadcast
/// automatically by the engine.
pub fn refund_tx(
    witness_script: &Script,
    timeout_block_height: u32,
    utxo: &HtlcUtxo,
    policy_asset: AssetId,
    destination: &Address,
    refund_secret_key: &BitcoinSecretKey,
    fee_sats: u64,
) -> Result<Transaction> {
    anyhow::ensure!(
        fee_sats < utxo.value_sat,
        "fee_sats must be less than the locked value"
    );

    let destination_spk = destination.script_pubkey();
    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::from_height(timeout_block_height)
            .context("timeout_block_height is invalid locktime")?,
        input: vec![htlc_input(utxo, Sequence::ENABLE_LOCKTIME_NO_RBF)],
        output: vec![
            TxOut {
                asset: Asset::Explicit(policy_asset),
                value: Value::Explicit(utxo.value_sat - fee_sats),
                nonce: Nonce::Null,
                script_pubkey: destination_spk,
                witness: TxOutWitness::default(),
            },
            TxOut::new_fee(fee_sats, policy_asset),
        ],
    };

    let secp = BitcoinSecp256k1::new();
    let sig = sign_htlc_input(&secp, &tx, witness_script, utxo.value_sat, refund_secret_key)
        .context("sign refund input")?;
    let refund_pubkey = BitcoinPublicKey::from_secret_key(&secp, refund_secret_key).serialize();

    // Empty third element selects the OP_ELSE branch.
    tx.input[0].witness.script_witness = vec![
        sig,
        refund_pubkey.to_vec(),
        vec![],
        witness_script.to_bytes(),
    ];

    Ok(tx)
}

fn htlc_input(utxo: &HtlcUtxo, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output: OutPoint {
            txid: utxo.txid,
            vout: utxo.vout,
        },
        is_pegin: false,
        script_sig: Script::new(),
        sequence,
        asset_issuance: Default::default(),
        witness: TxInWitness::default(),
    }
}

fn sign_htlc_input(
    secp: &BitcoinSecp256k1<lwk_wollet::elements::bitcoin::secp256k1::All>,
    tx: &Transaction,
    script_code: &Script,
    value_sat: u64,
    secret_key: &BitcoinSecretKey,
) -> Result<Vec<u8>> {
    let sighash_type = EcdsaSighashType::All;
    let mut cache = SighashCache::new(tx);
    let sighash = cache.segwitv0_sighash(0, script_code, Value::Explicit(value_sat), sighash_type);

    let msg = BitcoinMessage::from_digest_slice(&sighash.to_byte_array())
        .context("create sighash message")?;
    let sig: BitcoinEcdsaSignature = secp.sign_ecdsa(&msg, secret_key);
    let mut sig_bytes = sig.serialize_der().to_vec();
    sig_bytes.push(sighash_type.as_u32() as u8);
    Ok(sig_bytes)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    fn test_script() -> HtlcScript {
        HtlcScript {
            preimage_hash: sha256_preimage(&[7u8; 32]),
            claim_pubkey_hash160: [1u8; 20],
            refund_pubkey_hash160: [2u8; 20],
            timeout_block_height: 144_000,
        }
    }

    fn test_utxo() -> HtlcUtxo {
        HtlcUtxo {
            txid: Txid::from_str(
                "1111111111111111111111111111111111111111111111111111111111111111",
            )
            .unwrap(),
            vout: 0,
            value_sat: 50_000,
        }
    }

    fn test_policy_asset() -> AssetId {
        AssetId::from_str("2222222222222222222222222222222222222222222222222222222222222222")
            .unwrap()
    }

    fn test_destination(secp: &BitcoinSecp256k1<lwk_wollet::elements::bitcoin::secp256k1::All>) -> Address {
        let key = BitcoinSecretKey::from_slice(&[9u8; 32]).unwrap();
        let pubkey = lwk_wollet::elements::bitcoin::PublicKey::new(
            BitcoinPublicKey::from_secret_key(secp, &key),
        );
        Address::p2wpkh(&pubkey, None, &AddressParams::ELEMENTS)
    }

    #[test]
    fn commitment_round_trips_through_sha256() {
        let preimage = [7u8; 32];
        let hash = sha256_preimage(&preimage);
        assert_eq!(hash, sha256_preimage(&preimage));
        assert_ne!(hash, sha256_preimage(&[8u8; 32]));
    }

    #[test]
    fn p2wsh_address_is_stable_for_same_parameters() {
        let script = test_script();
        let a = script.p2wsh_address(&AddressParams::ELEMENTS);
        let b = test_script().p2wsh_address(&AddressParams::ELEMENTS);
        assert_eq!(a, b);

        let mut other = test_script();
        other.timeout_block_height += 1;
        assert_ne!(a, other.p2wsh_address(&AddressParams::ELEMENTS));
    }

    #[test]
    fn claim_witness_reveals_extractable_preimage() {
        let secp = BitcoinSecp256k1::new();
        let preimage = [7u8; 32];
        let script = test_script();
        let witness_script = script.witness_script();
        let key = BitcoinSecretKey::from_slice(&[3u8; 32]).unwrap();

        let tx = claim_tx(
            &witness_script,
            &test_utxo(),
            test_policy_asset(),
            &test_destination(&secp),
            &key,
            preimage,
            500,
        )
        .unwrap();

        let revealed = extract_claim_preimage(&tx, &witness_script, &script.preimage_hash)
            .expect("preimage in claim witness");
        assert_eq!(revealed, preimage);

        // A different contract's script does not match this spend.
        let mut other = test_script();
        other.claim_pubkey_hash160 = [4u8; 20];
        assert!(
            extract_claim_preimage(&tx, &other.witness_script(), &script.preimage_hash).is_none()
        );
    }

    #[test]
    fn refund_tx_sets_locktime_and_else_branch() {
        let secp = BitcoinSecp256k1::new();
        let script = test_script();
        let witness_script = script.witness_script();
        let key = BitcoinSecretKey::from_slice(&[5u8; 32]).unwrap();

        let tx = refund_tx(
            &witness_script,
            script.timeout_block_height,
            &test_utxo(),
            test_policy_asset(),
            &test_destination(&secp),
            &key,
            500,
        )
        .unwrap();

        assert_eq!(
            tx.lock_time,
            LockTime::from_height(script.timeout_block_height).unwrap()
        );
        // No preimage is revealed on the refund path.
        assert!(extract_claim_preimage(&tx, &witness_script, &script.preimage_hash).is_none());
    }

    #[test]
    fn fee_must_stay_below_locked_value() {
        let secp = BitcoinSecp256k1::new();
        let script = test_script();
        let key = BitcoinSecretKey::from_slice(&[3u8; 32]).unwrap();
        let utxo = test_utxo();

        let err = claim_tx(
            &script.witness_script(),
            &utxo,
            test_policy_asset(),
            &test_destination(&secp),
            &key,
            [7u8; 32],
            utxo.value_sat,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_p2wpkh_script() {
        let script = test_script();
        let p2wsh = script.p2wsh_address(&AddressParams::ELEMENTS);
        assert!(pubkey_hash160_from_p2wpkh_address(&p2wsh).is_err());
    }
}
