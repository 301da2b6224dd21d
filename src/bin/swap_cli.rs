use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use ln_reverse_swap::proto::v1::reverse_swap_service_client::ReverseSwapServiceClient;
use ln_reverse_swap::proto::v1::{
    CreateReverseSwapRequest, GetHealthRequest, GetSwapRequest, ListSwapsRequest, SwapStatus,
};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    grpc_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a reverse swap. The preimage itself never leaves the caller.
    CreateSwap {
        #[arg(long)]
        invoice_amount_sat: u64,

        #[arg(long)]
        preimage_hash: String,

        #[arg(long)]
        claim_public_key: String,

        #[arg(long)]
        claim_address: String,
    },
    GetSwap {
        #[arg(long)]
        swap_id: String,
    },
    ListSwaps,
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_reverse_swap::logging::init().ok();
    let args = Args::parse();

    let mut client = ReverseSwapServiceClient::connect(args.grpc_url)
        .await
        .context("connect gRPC")?;

    let out = match args.command {
        Command::CreateSwap {
            invoice_amount_sat,
            preimage_hash,
            claim_public_key,
            claim_address,
        } => {
            let created = client
                .create_reverse_swap(CreateReverseSwapRequest {
                    invoice_amount_sat,
                    preimage_hash,
                    claim_public_key,
                    claim_address,
                })
                .await
                .context("CreateReverseSwap")?
                .into_inner();

            json!({
              "swap_id": created.swap_id,
              "invoice": created.invoice,
              "lockup_address": created.lockup_address,
              "timeout_block_height": created.timeout_block_height,
              "onchain_amount_sat": created.onchain_amount_sat,
            })
        }
        Command::GetSwap { swap_id } => {
            let swap = client
                .get_swap(GetSwapRequest { swap_id })
                .await
                .context("GetSwap")?
                .into_inner();

            json!({
              "swap_id": swap.swap_id,
              "status": status_str(swap.status),
              "invoice": swap.invoice,
              "invoice_paid": swap.invoice_paid,
              "lockup_address": swap.lockup_address,
              "lockup_txid": swap.lockup_txid,
              "lockup_amount_sat": swap.lockup_amount_sat,
              "claim_txid": swap.claim_txid,
              "timeout_block_height": swap.timeout_block_height,
            })
        }
        Command::ListSwaps => {
            let listed = client
                .list_swaps(ListSwapsRequest {})
                .await
                .context("ListSwaps")?
                .into_inner();

            json!({
              "swaps": listed.swaps.iter().map(|s| json!({
                "swap_id": s.swap_id,
                "status": status_str(s.status),
                "invoice_amount_sat": s.invoice_amount_sat,
                "timeout_block_height": s.timeout_block_height,
                "created_at": s.created_at,
              })).collect::<Vec<_>>(),
            })
        }
        Command::Health => {
            let health = client
                .get_health(GetHealthRequest {})
                .await
                .context("GetHealth")?
                .into_inner();

            json!({
              "healthy": health.healthy,
              "block_height": health.block_height,
              "active_claim_watches": health.active_claim_watches,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn status_str(status: i32) -> String {
    SwapStatus::try_from(status)
        .ok()
        .map(|s| format!("{s:?}"))
        .unwrap_or_else(|| format!("UNKNOWN({status})"))
}
