use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use ln_reverse_swap::chain::electrum::ElectrumHtlcClient;
use ln_reverse_swap::chain::wallet::OnchainWallet;
use ln_reverse_swap::lightning::hold::{HoldInvoiceClient as _, LndHoldInvoiceClient};
use ln_reverse_swap::proto::v1::reverse_swap_service_server::ReverseSwapServiceServer;
use ln_reverse_swap::swap::monitor::{ClaimMonitor, MonitorConfig};
use ln_reverse_swap::swap::rpc::ReverseSwapRpc;
use ln_reverse_swap::swap::service::{ReverseSwapService, SwapServiceConfig};
use ln_reverse_swap::swap::store::SqliteSwapStore;
use lwk_wollet::ElementsNetwork;
use tonic::transport::Server;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen_addr: String,

    #[arg(long)]
    lnd_rest_url: String,

    #[arg(long)]
    lnd_macaroon_hex: String,

    #[arg(long)]
    liquid_electrum_url: String,

    #[arg(long)]
    wallet_dir: PathBuf,

    #[arg(long)]
    store_path: PathBuf,

    #[arg(long)]
    wallet_mnemonic: String,

    #[arg(long)]
    wallet_slip77: String,

    #[arg(long, default_value_t = 0)]
    refund_key_index: u32,

    #[arg(long, default_value_t = 10_000)]
    min_invoice_amount_sat: u64,

    #[arg(long, default_value_t = 5_000)]
    fee_rate_ppm: u64,

    #[arg(long, default_value_t = 1_440)]
    timeout_delta_blocks: u32,

    #[arg(long, default_value_t = 3_600)]
    invoice_wait_secs: u64,

    #[arg(long, default_value_t = 15)]
    claim_poll_interval_secs: u64,

    #[arg(long, default_value_t = 1_000)]
    claim_poll_window_blocks: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_reverse_swap::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;

    std::fs::create_dir_all(&args.wallet_dir).context("create wallet_dir")?;

    let network = ElementsNetwork::default_regtest();
    let wallet = OnchainWallet::new(
        &args.wallet_mnemonic,
        &args.wallet_slip77,
        &args.liquid_electrum_url,
        &args.wallet_dir,
        network,
    )
    .context("create liquid wallet")?;

    let refund_address = wallet
        .address_at(args.refund_key_index)
        .context("get refund address")?;
    tracing::info!(
        refund_address = %refund_address,
        refund_key_index = args.refund_key_index,
        balance_sat = wallet.balance_sat().context("get wallet balance")?,
        "liquid wallet ready"
    );

    let wallet = Arc::new(Mutex::new(wallet));
    let chain = Arc::new(
        ElectrumHtlcClient::new(wallet, args.refund_key_index).context("create htlc client")?,
    );

    let ln = Arc::new(
        LndHoldInvoiceClient::new(&args.lnd_rest_url, &args.lnd_macaroon_hex)
            .context("create lnd client")?,
    );
    ln.connect().await.context("connect to lnd")?;
    tracing::info!(lnd_rest_url = %args.lnd_rest_url, "lightning node session ready");

    let store = Arc::new(Mutex::new(
        SqliteSwapStore::open(args.store_path).context("open sqlite store")?,
    ));

    let monitor = ClaimMonitor::new(
        MonitorConfig {
            poll_interval: Duration::from_secs(args.claim_poll_interval_secs),
            poll_window_blocks: args.claim_poll_window_blocks,
        },
        ln.clone(),
        chain.clone(),
        store.clone(),
    );
    monitor.start().context("start claim monitor")?;

    let cfg = SwapServiceConfig {
        min_invoice_amount_sat: args.min_invoice_amount_sat,
        fee_rate_ppm: args.fee_rate_ppm,
        timeout_delta_blocks: args.timeout_delta_blocks,
        invoice_wait: Duration::from_secs(args.invoice_wait_secs),
    };

    let service = ReverseSwapService::new(cfg, ln, chain, store, monitor.clone());

    tracing::info!(%listen_addr, "starting reverse swap gRPC server");

    let serve = Server::builder()
        .add_service(ReverseSwapServiceServer::new(ReverseSwapRpc::new(service)))
        .serve(listen_addr);

    tokio::select! {
        result = serve => result.context("serve gRPC")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    monitor.stop();
    Ok(())
}
