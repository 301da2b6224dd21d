use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tokio::time::Instant;

/// A held invoice as returned by the node: the payment request handed to the
/// payer and the hash the hold is keyed on.
#[derive(Debug, Clone)]
pub struct HeldInvoice {
    pub payment_request: String,
    pub payment_hash: [u8; 32],
}

/// Hold-invoice operations of the Lightning node. A hold invoice accepts an
/// incoming payment into a pending state and only finalizes it when settled
/// with the matching preimage.
#[async_trait]
pub trait HoldInvoiceClient: Send + Sync {
    /// Verifies the authenticated session to the node.
    async fn connect(&self) -> Result<()>;

    /// Creates a held invoice for `amount_sat` keyed to `preimage_hash`.
    async fn create_hold_invoice(
        &self,
        amount_sat: u64,
        preimage_hash: [u8; 32],
        memo: &str,
    ) -> Result<HeldInvoice>;

    /// Waits until the invoice is accepted (payment held). Returns `false`
    /// when the invoice is cancelled or the timeout elapses; the watch is
    /// released on every exit path.
    async fn wait_for_invoice_accepted(
        &self,
        preimage_hash: [u8; 32],
        timeout: Duration,
    ) -> Result<bool>;

    /// One-shot acceptance check.
    async fn is_invoice_accepted(&self, preimage_hash: [u8; 32]) -> Result<bool>;

    /// Finalizes the held invoice matching `preimage`.
    async fn settle_invoice(&self, preimage: [u8; 32]) -> Result<()>;
}

/// LND REST connector. Authentication is the admin macaroon passed as hex in
/// the `Grpc-Metadata-macaroon` header.
#[derive(Clone)]
pub struct LndHoldInvoiceClient {
    base_url: String,
    macaroon_hex: String,
    http: reqwest::Client,
    poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

#[derive(Debug, Deserialize)]
struct AddHoldInvoiceResponse {
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LookupInvoiceResponse {
    state: InvoiceState,
}

impl LndHoldInvoiceClient {
    pub fn new(base_url: &str, macaroon_hex: &str) -> Result<Self> {
        anyhow::ensure!(
            hex::decode(macaroon_hex).is_ok(),
            "macaroon must be hex encoded"
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            macaroon_hex: macaroon_hex.to_string(),
            http,
            poll_interval: Duration::from_secs(1),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
    }

    fn post(&self, path: &str, body: serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .json(&body)
    }

    async fn lookup_state(&self, preimage_hash: [u8; 32]) -> Result<InvoiceState> {
        let resp = self
            .get(&format!("/v1/invoice/{}", hex::encode(preimage_hash)))
            .send()
            .await
            .context("lookup invoice")?;

        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "lookup invoice failed: {status}: {}",
            resp.text().await.unwrap_or_default()
        );

        let invoice: LookupInvoiceResponse =
            resp.json().await.context("decode invoice lookup")?;
        Ok(invoice.state)
    }
}

#[async_trait]
impl HoldInvoiceClient for LndHoldInvoiceClient {
    async fn connect(&self) -> Result<()> {
        let resp = self.get("/v1/getinfo").send().await.context("getinfo")?;
        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "node session check failed: {status}: {}",
            resp.text().await.unwrap_or_default()
        );
        Ok(())
    }

    async fn create_hold_invoice(
        &self,
        amount_sat: u64,
        preimage_hash: [u8; 32],
        memo: &str,
    ) -> Result<HeldInvoice> {
        let body = serde_json::json!({
            "hash": BASE64.encode(preimage_hash),
            "value": amount_sat.to_string(),
            "memo": memo,
        });

        let resp = self
            .post("/v2/invoices/hodl", body)
            .send()
            .await
            .context("add hold invoice")?;

        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "add hold invoice failed: {status}: {}",
            resp.text().await.unwrap_or_default()
        );

        let added: AddHoldInvoiceResponse =
            resp.json().await.context("decode hold invoice response")?;

        Ok(HeldInvoice {
            payment_request: added.payment_request,
            payment_hash: preimage_hash,
        })
    }

    async fn wait_for_invoice_accepted(
        &self,
        preimage_hash: [u8; 32],
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            // Transport blips during an hour-long wait are retried until the
            // deadline; only the deadline or a cancelled invoice gives up.
            match self.lookup_state(preimage_hash).await {
                Ok(InvoiceState::Accepted | InvoiceState::Settled) => return Ok(true),
                Ok(InvoiceState::Canceled) => return Ok(false),
                Ok(InvoiceState::Open) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "invoice lookup failed, retrying");
                }
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn is_invoice_accepted(&self, preimage_hash: [u8; 32]) -> Result<bool> {
        Ok(matches!(
            self.lookup_state(preimage_hash).await?,
            InvoiceState::Accepted | InvoiceState::Settled
        ))
    }

    async fn settle_invoice(&self, preimage: [u8; 32]) -> Result<()> {
        let body = serde_json::json!({ "preimage": BASE64.encode(preimage) });

        let resp = self
            .post("/v2/invoices/settle", body)
            .send()
            .await
            .context("settle invoice")?;

        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "settle invoice failed: {status}: {}",
            resp.text().await.unwrap_or_default()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_state_decodes_node_strings() {
        let state: InvoiceState = serde_json::from_str("\"ACCEPTED\"").unwrap();
        assert_eq!(state, InvoiceState::Accepted);
        let state: InvoiceState = serde_json::from_str("\"CANCELED\"").unwrap();
        assert_eq!(state, InvoiceState::Canceled);
        assert!(serde_json::from_str::<InvoiceState>("\"HELD\"").is_err());
    }

    #[test]
    fn rejects_non_hex_macaroon() {
        assert!(LndHoldInvoiceClient::new("http://127.0.0.1:8080", "zz").is_err());
        assert!(LndHoldInvoiceClient::new("http://127.0.0.1:8080/", "0201af").is_ok());
    }
}
