//! Offline end-to-end scenarios against the deterministic mock engine.
//!
//! These walk the full escrow lifecycle the way the real parties would:
//! the guardian under test talks HTTP, while the mock server and worker
//! parties run their sides of the key exchange directly against the
//! engine.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use guardian_server::driver::ProtocolDriver;
use guardian_server::handlers::{self, AppState, GuardianCore};
use guardian_server::registry::EscrowRegistry;
use guardian_server::signing::SigningGate;
use guardian_server::store::BountyStore;
use guardian_server::sweeper::CleanupSweeper;
use guardian_wallet::{CryptoEngine, MockEngine, MultisigWallet, RoundTriple};

struct Guardian {
    engine: MockEngine,
    registry: Arc<EscrowRegistry>,
    state: web::Data<AppState>,
    _dir: tempfile::TempDir,
}

async fn guardian() -> Guardian {
    let dir = tempfile::tempdir().unwrap();
    let store = BountyStore::new(dir.path().join("escrows.json"));
    let registry = Arc::new(EscrowRegistry::open(store).unwrap());
    let engine = MockEngine::new();
    let engine_arc: Arc<dyn CryptoEngine> = Arc::new(engine.clone());

    let core = Arc::new(GuardianCore {
        driver: ProtocolDriver::new(Arc::clone(&engine_arc), Arc::clone(&registry)),
        gate: SigningGate::new(Arc::clone(&registry)),
        registry: Arc::clone(&registry),
        engine: engine_arc,
    });

    let state = web::Data::new(AppState::new());
    state.install_core(core).await;

    Guardian {
        engine,
        registry,
        state,
        _dir: dir,
    }
}

/// One remote participant (the mediating server or the worker).
struct Party {
    wallet: Box<dyn MultisigWallet>,
    round1: String,
}

impl Party {
    async fn join(engine: &MockEngine, label: &str) -> Self {
        let wallet = engine.create_wallet(label).await.unwrap();
        let round1 = wallet.prepare_round1().await.unwrap();
        Self { wallet, round1 }
    }
}

#[actix_web::test]
async fn full_escrow_lifecycle_over_http() {
    let g = guardian().await;
    let app =
        test::init_service(App::new().app_data(g.state.clone()).configure(handlers::routes))
            .await;

    // The guardian opens the handshake.
    let req = test::TestRequest::post()
        .uri("/escrows/begin")
        .set_json(serde_json::json!({ "escrow_id": "bounty-77" }))
        .to_request();
    let begin: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let guardian_r1 = begin["round1"].as_str().unwrap().to_string();

    // Server and worker run their rounds with the same ordering.
    let server = Party::join(&g.engine, "server").await;
    let worker = Party::join(&g.engine, "worker").await;
    let ordered = RoundTriple::new(&guardian_r1, &server.round1, &worker.round1);
    let server_r2 = server.wallet.make_round2(&ordered).await.unwrap();
    let worker_r2 = worker.wallet.make_round2(&ordered).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/escrows/finalize")
        .set_json(serde_json::json!({
            "escrow_id": "bounty-77",
            "deadline_block": 1_000_000u64,
            "server_round1": server.round1,
            "server_round2": server_r2,
            "worker_round1": worker.round1,
            "worker_round2": worker_r2,
        }))
        .to_request();
    let finalized: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let address = finalized["multisig_address"].as_str().unwrap().to_string();
    assert!(address.starts_with('9'));
    assert_eq!(finalized["is_ready"], true);

    // All three parties converge on the same address.
    let (server_addr, worker_addr) = {
        let dummy = RoundTriple::new("x", "y", "z");
        (
            server.wallet.exchange_keys(&dummy).await.unwrap().address,
            worker.wallet.exchange_keys(&dummy).await.unwrap().address,
        )
    };
    assert_eq!(server_addr, address);
    assert_eq!(worker_addr, address);

    // The record is queryable and carries the same address.
    let req = test::TestRequest::get().uri("/escrows/bounty-77").to_request();
    let record: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(record["multisig_address"], address.as_str());
    assert_eq!(record["deadline_block"], 1_000_000);
    assert_eq!(record["wallet_resident"], true);

    // Premature refund is blocked with the exact distance to go.
    let req = test::TestRequest::post()
        .uri("/escrows/bounty-77/sign-refund")
        .set_json(serde_json::json!({ "current_block": 100u64, "tx_hex": "deadbeef" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "DEADLINE_NOT_REACHED");
    assert_eq!(body["blocks_remaining"], 999_900);

    // At the deadline the refund signs.
    let req = test::TestRequest::post()
        .uri("/escrows/bounty-77/sign-refund")
        .set_json(serde_json::json!({ "current_block": 1_000_000u64, "tx_hex": "deadbeef" }))
        .to_request();
    let signed: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(signed["tx_hex"].as_str().unwrap().contains(":sig[bounty-77]"));

    // A dispute payout needs no height at all.
    let req = test::TestRequest::post()
        .uri("/escrows/bounty-77/sign-payout")
        .set_json(serde_json::json!({
            "tx_hex": "cafebabe",
            "reason": "worker abandoned the job",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // Output views can be exchanged; a bad counterpart blob degrades to
    // imported = 0 instead of failing the call.
    let req = test::TestRequest::post()
        .uri("/escrows/bounty-77/sync-outputs")
        .set_json(serde_json::json!({ "counterpart_exports": ["corrupt-blob"] }))
        .to_request();
    let sync: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(sync["export"], "outputs[bounty-77]");
    assert_eq!(sync["imported"], 0);
}

#[actix_web::test]
async fn permuted_round1_ordering_diverges() {
    let g = guardian().await;
    let app =
        test::init_service(App::new().app_data(g.state.clone()).configure(handlers::routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/escrows/begin")
        .set_json(serde_json::json!({ "escrow_id": "b1" }))
        .to_request();
    let begin: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let guardian_r1 = begin["round1"].as_str().unwrap().to_string();

    let server = Party::join(&g.engine, "server").await;
    let worker = Party::join(&g.engine, "worker").await;

    // The worker swaps two payloads when assembling the set.
    let ordered = RoundTriple::new(&guardian_r1, &server.round1, &worker.round1);
    let shuffled = RoundTriple::new(&guardian_r1, &worker.round1, &server.round1);
    let server_r2 = server.wallet.make_round2(&ordered).await.unwrap();
    let worker_r2 = worker.wallet.make_round2(&shuffled).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/escrows/finalize")
        .set_json(serde_json::json!({
            "escrow_id": "b1",
            "deadline_block": 500u64,
            "server_round1": server.round1,
            "server_round2": server_r2,
            "worker_round1": worker.round1,
            "worker_round2": worker_r2,
        }))
        .to_request();
    let finalized: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let guardian_addr = finalized["multisig_address"].as_str().unwrap();

    let dummy = RoundTriple::new("x", "y", "z");
    let worker_addr = worker.wallet.exchange_keys(&dummy).await.unwrap().address;

    // The shuffling party walks away with a different address; funds
    // sent to the guardian's address are out of its reach.
    assert_ne!(worker_addr, guardian_addr);
}

#[actix_web::test]
async fn abandoned_sessions_are_reclaimed_and_survivors_kept() {
    let g = guardian().await;
    let app =
        test::init_service(App::new().app_data(g.state.clone()).configure(handlers::routes))
            .await;

    for id in ["left-behind", "active"] {
        let req = test::TestRequest::post()
            .uri("/escrows/begin")
            .set_json(serde_json::json!({ "escrow_id": id }))
            .to_request();
        test::call_service(&app, req).await;
    }
    assert_eq!(g.registry.pending_count(), 2);

    // A sweep after the TTL has elapsed reclaims both wallets.
    let sweeper = CleanupSweeper::new(
        Arc::clone(&g.registry),
        Duration::from_secs(60),
        Duration::from_secs(300),
    );
    let later = chrono::Utc::now() + chrono::Duration::seconds(301);
    let evicted = sweeper.sweep_once(later).await;

    assert_eq!(evicted, 2);
    assert_eq!(g.registry.pending_count(), 0);
    let mut released = g.engine.released();
    released.sort();
    assert_eq!(released, vec!["active".to_string(), "left-behind".to_string()]);

    // A reclaimed id can start over.
    let req = test::TestRequest::post()
        .uri("/escrows/begin")
        .set_json(serde_json::json!({ "escrow_id": "active" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn registry_survives_a_restart_without_wallet_handles() {
    let g = guardian().await;
    let app =
        test::init_service(App::new().app_data(g.state.clone()).configure(handlers::routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/escrows/begin")
        .set_json(serde_json::json!({ "escrow_id": "b1" }))
        .to_request();
    let begin: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let guardian_r1 = begin["round1"].as_str().unwrap().to_string();

    let server = Party::join(&g.engine, "server").await;
    let worker = Party::join(&g.engine, "worker").await;
    let ordered = RoundTriple::new(&guardian_r1, &server.round1, &worker.round1);
    let server_r2 = server.wallet.make_round2(&ordered).await.unwrap();
    let worker_r2 = worker.wallet.make_round2(&ordered).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/escrows/finalize")
        .set_json(serde_json::json!({
            "escrow_id": "b1",
            "deadline_block": 500u64,
            "server_round1": server.round1,
            "server_round2": server_r2,
            "worker_round1": worker.round1,
            "worker_round2": worker_r2,
        }))
        .to_request();
    test::call_service(&app, req).await;

    // A new process opens the same document: the record is there, the
    // signing handle is not.
    let store = BountyStore::new(g._dir.path().join("escrows.json"));
    let reopened = Arc::new(EscrowRegistry::open(store).unwrap());
    assert_eq!(reopened.record_count(), 1);
    assert!(reopened.get_record("b1").is_some());
    assert!(reopened.wallet("b1").is_none());

    let gate = SigningGate::new(reopened);
    let result = gate.sign_refund("b1", 10_000, "deadbeef").await;
    assert!(matches!(
        result,
        Err(guardian_server::error::GuardianError::WalletNotResident(_))
    ));
}
