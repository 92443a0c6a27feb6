//! Escrow guardian service entry point.
//!
//! Startup order matters: the HTTP server binds immediately and answers
//! 503 on escrow endpoints while a background probe waits for the
//! wallet engine to become healthy. Once the probe passes, the core
//! (driver, signing gate, registry) is installed and the sweeper
//! starts.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use guardian_server::config::GuardianConfig;
use guardian_server::handlers::{self, AppState, GuardianCore};
use guardian_server::driver::ProtocolDriver;
use guardian_server::registry::EscrowRegistry;
use guardian_server::signing::SigningGate;
use guardian_server::store::BountyStore;
use guardian_server::sweeper::CleanupSweeper;
use guardian_wallet::{CryptoEngine, WalletRpc, WalletRpcConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENGINE_PROBE_INTERVAL: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,guardian_server=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Wait for the wallet engine, then install the core so the escrow
/// endpoints open up.
async fn wait_for_engine(
    state: web::Data<AppState>,
    engine: Arc<dyn CryptoEngine>,
    registry: Arc<EscrowRegistry>,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match engine.health().await {
            Ok(health) => {
                info!(version = %health.version, attempt, "wallet engine is ready");
                let core = Arc::new(GuardianCore {
                    driver: ProtocolDriver::new(Arc::clone(&engine), Arc::clone(&registry)),
                    gate: SigningGate::new(Arc::clone(&registry)),
                    registry,
                    engine,
                });
                state.install_core(core).await;
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "wallet engine not ready yet");
                tokio::time::sleep(ENGINE_PROBE_INTERVAL).await;
            }
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = GuardianConfig::from_env().context("invalid configuration")?;
    info!(
        bind = %config.bind_addr,
        store = %config.store_path.display(),
        "starting escrow guardian"
    );

    let store = BountyStore::new(config.store_path.clone());
    let registry =
        Arc::new(EscrowRegistry::open(store).context("failed to open escrow registry")?);
    info!(
        finalized = registry.record_count(),
        "escrow registry loaded"
    );

    let engine: Arc<dyn CryptoEngine> = Arc::new(
        WalletRpc::new(WalletRpcConfig {
            rpc_url: config.wallet_rpc_url.clone(),
            wallet_password: config.wallet_password.clone(),
        })
        .context("failed to construct wallet RPC adapter")?,
    );

    let state = web::Data::new(AppState::new());

    tokio::spawn(wait_for_engine(
        state.clone(),
        Arc::clone(&engine),
        Arc::clone(&registry),
    ));

    let sweeper = Arc::new(CleanupSweeper::new(
        Arc::clone(&registry),
        config.sweep_interval,
        config.session_ttl,
    ));
    sweeper.start();

    let allowed_origin = config.allowed_origin.clone();
    let bind_addr = config.bind_addr.clone();

    HttpServer::new(move || {
        let cors = match &allowed_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allowed_methods(vec!["GET", "POST"])
                .allow_any_header()
                .max_age(3600),
            // No origin configured: same-host tooling only.
            None => Cors::default(),
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(handlers::routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await?;

    Ok(())
}
