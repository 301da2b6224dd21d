use std::str::FromStr as _;

use anyhow::Result;
use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;

pub fn payment_hash_from_bolt11(invoice: &str) -> Result<[u8; 32]> {
    let invoice = Bolt11Invoice::from_str(invoice)
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(invoice.payment_hash().to_byte_array())
}

pub fn amount_msat_from_bolt11(invoice: &str) -> Result<Option<u64>> {
    let invoice = Bolt11Invoice::from_str(invoice)
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(invoice.amount_milli_satoshis())
}

/// Checks a node-issued invoice against the terms the engine asked for:
/// the payment hash commitment and the quoted amount. A hash mismatch means
/// a payment held against the invoice could never be settled by this swap's
/// preimage; an amount mismatch means the node misquoted the swap.
pub fn ensure_invoice_terms(
    invoice: &str,
    expected_hash: &[u8; 32],
    expected_amount_msat: u64,
) -> Result<()> {
    ensure_payment_hash(invoice, expected_hash)?;

    let amount_msat = amount_msat_from_bolt11(invoice)?;
    anyhow::ensure!(
        amount_msat == Some(expected_amount_msat),
        "invoice amount mismatch: expected {expected_amount_msat} msat, got {amount_msat:?}"
    );
    Ok(())
}

/// Checks that a node-issued invoice commits to the expected payment hash.
pub fn ensure_payment_hash(invoice: &str, expected: &[u8; 32]) -> Result<()> {
    let actual = payment_hash_from_bolt11(invoice)?;
    anyhow::ensure!(
        &actual == expected,
        "invoice payment hash mismatch: expected {}, got {}",
        hex::encode(expected),
        hex::encode(actual)
    );
    Ok(())
}
