use tonic::{Request, Response, Status};

use crate::proto::v1 as pb;
use crate::swap::SwapStatus;
use crate::swap::service::{CreateReverseSwap, ReverseSwapService, SwapError};

/// Maps the engine onto the generated gRPC service. Pure translation; no
/// swap logic lives here.
#[derive(Clone)]
pub struct ReverseSwapRpc {
    service: ReverseSwapService,
}

impl ReverseSwapRpc {
    pub fn new(service: ReverseSwapService) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl pb::reverse_swap_service_server::ReverseSwapService for ReverseSwapRpc {
    async fn create_reverse_swap(
        &self,
        request: Request<pb::CreateReverseSwapRequest>,
    ) -> Result<Response<pb::CreateReverseSwapResponse>, Status> {
        let req = request.into_inner();

        let created = self
            .service
            .create_reverse_swap(CreateReverseSwap {
                invoice_amount_sat: req.invoice_amount_sat,
                preimage_hash: req.preimage_hash,
                claim_public_key: req.claim_public_key,
                claim_address: req.claim_address,
            })
            .await
            .map_err(into_status)?;

        Ok(Response::new(pb::CreateReverseSwapResponse {
            swap_id: created.swap_id,
            invoice: created.invoice,
            lockup_address: created.lockup_address,
            timeout_block_height: created.timeout_block_height,
            onchain_amount_sat: created.onchain_amount_sat,
        }))
    }

    async fn get_swap(
        &self,
        request: Request<pb::GetSwapRequest>,
    ) -> Result<Response<pb::GetSwapResponse>, Status> {
        let req = request.into_inner();
        if req.swap_id.trim().is_empty() {
            return Err(Status::invalid_argument("swap_id is required"));
        }

        let record = self.service.get_swap(&req.swap_id).map_err(into_status)?;

        Ok(Response::new(pb::GetSwapResponse {
            swap_id: record.swap_id,
            status: status_to_proto(record.status) as i32,
            invoice: record.invoice,
            invoice_paid: record.invoice_paid,
            lockup_address: record.lockup_address,
            lockup_txid: record.lockup_txid.unwrap_or_default(),
            lockup_amount_sat: record.lockup_amount_sat.unwrap_or_default(),
            claim_txid: record.claim_txid.unwrap_or_default(),
            timeout_block_height: record.timeout_block_height,
        }))
    }

    async fn list_swaps(
        &self,
        _request: Request<pb::ListSwapsRequest>,
    ) -> Result<Response<pb::ListSwapsResponse>, Status> {
        let records = self.service.list_swaps().map_err(into_status)?;

        let swaps = records
            .into_iter()
            .map(|record| pb::SwapSummary {
                swap_id: record.swap_id,
                status: status_to_proto(record.status) as i32,
                invoice_amount_sat: record.invoice_amount_sat,
                timeout_block_height: record.timeout_block_height,
                created_at: record.created_at,
            })
            .collect();

        Ok(Response::new(pb::ListSwapsResponse { swaps }))
    }

    async fn get_health(
        &self,
        _request: Request<pb::GetHealthRequest>,
    ) -> Result<Response<pb::GetHealthResponse>, Status> {
        let health = self.service.health().await.map_err(into_status)?;

        Ok(Response::new(pb::GetHealthResponse {
            healthy: health.healthy,
            block_height: health.block_height,
            active_claim_watches: health.active_claim_watches as u64,
        }))
    }
}

fn into_status(err: SwapError) -> Status {
    match err {
        SwapError::InvalidRequest(msg) => Status::invalid_argument(msg),
        SwapError::NotFound(id) => Status::not_found(format!("swap not found: {id}")),
        SwapError::Internal(err) => Status::internal(format!("{err:#}")),
    }
}

fn status_to_proto(status: SwapStatus) -> pb::SwapStatus {
    match status {
        SwapStatus::Pending => pb::SwapStatus::Pending,
        SwapStatus::InvoicePaid => pb::SwapStatus::InvoicePaid,
        SwapStatus::Locked => pb::SwapStatus::Locked,
        SwapStatus::Claimed => pb::SwapStatus::Claimed,
        SwapStatus::Expired => pb::SwapStatus::Expired,
        SwapStatus::Refunded => pb::SwapStatus::Refunded,
        SwapStatus::Failed => pb::SwapStatus::Failed,
    }
}
