//! HTTP surface of the guardian.
//!
//! All handlers resolve the shared core first: until the startup probe
//! has seen a healthy wallet engine, every escrow endpoint answers 503
//! rather than failing half-way through a handshake. Record views never
//! include the recovery seed.

use std::sync::Arc;
use std::time::Instant;

use actix_web::{get, post, web, HttpResponse};
use guardian_wallet::CryptoEngine;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::driver::ProtocolDriver;
use crate::error::{GuardianError, GuardianResult};
use crate::registry::{BountyRecord, EscrowRegistry};
use crate::signing::SigningGate;

/// Everything the handlers need once the engine probe has passed.
pub struct GuardianCore {
    pub driver: ProtocolDriver,
    pub gate: SigningGate,
    pub registry: Arc<EscrowRegistry>,
    pub engine: Arc<dyn CryptoEngine>,
}

/// Shared application state. `core` stays empty until the wallet engine
/// answers its first health probe.
pub struct AppState {
    core: tokio::sync::RwLock<Option<Arc<GuardianCore>>>,
    started_at: Instant,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            core: tokio::sync::RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    pub async fn install_core(&self, core: Arc<GuardianCore>) {
        *self.core.write().await = Some(core);
    }

    async fn core(&self) -> GuardianResult<Arc<GuardianCore>> {
        self.core
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(GuardianError::NotInitialized)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct BeginRequest {
    pub escrow_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub escrow_id: String,
    pub deadline_block: u64,
    pub server_round1: String,
    pub server_round2: String,
    pub worker_round1: String,
    pub worker_round2: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncOutputsRequest {
    #[serde(default)]
    pub counterpart_exports: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignRefundRequest {
    pub current_block: u64,
    pub tx_hex: String,
}

#[derive(Debug, Deserialize)]
pub struct SignPayoutRequest {
    pub tx_hex: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecordView {
    escrow_id: String,
    deadline_block: u64,
    multisig_address: String,
    is_ready: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    /// Whether this process still holds the signing handle. False after
    /// a restart; signing then needs seed recovery.
    wallet_resident: bool,
}

impl RecordView {
    fn from_record(escrow_id: String, record: &BountyRecord, resident: bool) -> Self {
        Self {
            escrow_id,
            deadline_block: record.deadline_block,
            multisig_address: record.multisig_address.clone(),
            is_ready: record.is_ready,
            created_at: record.created_at,
            wallet_resident: resident,
        }
    }
}

fn require_field(value: &str, name: &str) -> GuardianResult<()> {
    if value.trim().is_empty() {
        return Err(GuardianError::Validation(format!(
            "{name} must not be empty"
        )));
    }
    Ok(())
}

#[get("/health")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
    let uptime = state.started_at.elapsed().as_secs();

    match state.core().await {
        Ok(core) => {
            let engine = match core.engine.health().await {
                Ok(h) => serde_json::json!({ "reachable": true, "version": h.version }),
                Err(e) => serde_json::json!({ "reachable": false, "details": e.to_string() }),
            };
            HttpResponse::Ok().json(serde_json::json!({
                "status": "ok",
                "service": "escrow-guardian",
                "ready": true,
                "uptime_secs": uptime,
                "pending_sessions": core.registry.pending_count(),
                "finalized_escrows": core.registry.record_count(),
                "engine": engine,
            }))
        }
        Err(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "starting",
            "service": "escrow-guardian",
            "ready": false,
            "uptime_secs": uptime,
        })),
    }
}

#[post("/escrows/begin")]
async fn begin_escrow(
    state: web::Data<AppState>,
    body: web::Json<BeginRequest>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    require_field(&body.escrow_id, "escrow_id")?;

    let round1 = core.driver.begin(&body.escrow_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "escrow_id": body.escrow_id,
        "round1": round1,
    })))
}

#[post("/escrows/finalize")]
async fn finalize_escrow(
    state: web::Data<AppState>,
    body: web::Json<FinalizeRequest>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    require_field(&body.escrow_id, "escrow_id")?;
    require_field(&body.server_round1, "server_round1")?;
    require_field(&body.server_round2, "server_round2")?;
    require_field(&body.worker_round1, "worker_round1")?;
    require_field(&body.worker_round2, "worker_round2")?;

    let outcome = core
        .driver
        .finalize(
            &body.escrow_id,
            body.deadline_block,
            &body.server_round1,
            &body.server_round2,
            &body.worker_round1,
            &body.worker_round2,
        )
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "escrow_id": body.escrow_id,
        "round1": outcome.round1,
        "round2": outcome.round2,
        "multisig_address": outcome.multisig_address,
        "is_ready": outcome.is_ready,
    })))
}

#[get("/escrows")]
async fn list_escrows(state: web::Data<AppState>) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;

    let escrows: Vec<RecordView> = core
        .registry
        .list_records()
        .into_iter()
        .map(|(id, record)| {
            let resident = core.registry.wallet(&id).is_some();
            RecordView::from_record(id, &record, resident)
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "pending": core.registry.pending_count(),
        "count": escrows.len(),
        "escrows": escrows,
    })))
}

#[get("/escrows/{escrow_id}")]
async fn get_escrow(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    let escrow_id = path.into_inner();

    if let Some(record) = core.registry.get_record(&escrow_id) {
        let resident = core.registry.wallet(&escrow_id).is_some();
        return Ok(HttpResponse::Ok()
            .json(RecordView::from_record(escrow_id, &record, resident)));
    }

    if let Some((_, round1, created_at)) = core.registry.pending_session(&escrow_id) {
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "escrow_id": escrow_id,
            "state": "pending",
            "round1": round1,
            "created_at": created_at,
        })));
    }

    Err(GuardianError::NotFound(format!(
        "no escrow {escrow_id}"
    )))
}

#[post("/escrows/{escrow_id}/sync-outputs")]
async fn sync_outputs(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SyncOutputsRequest>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    let escrow_id = path.into_inner();

    let sync = core
        .gate
        .sync_outputs(&escrow_id, &body.counterpart_exports)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "escrow_id": escrow_id,
        "export": sync.export,
        "imported": sync.imported,
    })))
}

#[post("/escrows/{escrow_id}/sign-refund")]
async fn sign_refund(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SignRefundRequest>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    let escrow_id = path.into_inner();
    require_field(&body.tx_hex, "tx_hex")?;

    let signed = core
        .gate
        .sign_refund(&escrow_id, body.current_block, &body.tx_hex)
        .await?;

    info!(escrow_id, is_ready = signed.is_ready, "refund signed");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "escrow_id": escrow_id,
        "tx_hex": signed.tx_hex,
        "signers": signed.signers,
        "is_ready": signed.is_ready,
    })))
}

#[post("/escrows/{escrow_id}/sign-payout")]
async fn sign_payout(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SignPayoutRequest>,
) -> GuardianResult<HttpResponse> {
    let core = state.core().await?;
    let escrow_id = path.into_inner();
    require_field(&body.tx_hex, "tx_hex")?;

    let signed = core
        .gate
        .sign_payout(&escrow_id, &body.tx_hex, body.reason.as_deref())
        .await?;

    info!(escrow_id, is_ready = signed.is_ready, "payout signed");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "escrow_id": escrow_id,
        "tx_hex": signed.tx_hex,
        "signers": signed.signers,
        "is_ready": signed.is_ready,
    })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(begin_escrow)
        .service(finalize_escrow)
        .service(list_escrows)
        .service(get_escrow)
        .service(sync_outputs)
        .service(sign_refund)
        .service(sign_payout);
}
