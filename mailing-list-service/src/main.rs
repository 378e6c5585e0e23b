//! Process entry point: loads `Config`, wires `AppState`, spawns the
//! committee-event consumer alongside the REST server, and drains both on
//! SIGINT/SIGTERM. Grounded on `daemon/src/main.rs`'s pattern of a
//! `tokio::sync::watch` shutdown signal broadcast to background tasks while
//! the foreground `HttpServer` future is awaited directly.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use mailing_list_core::bus::test_support::InMemoryBus;
use mailing_list_core::provider::mock::MockGroupsIoClient;
use mailing_list_core::storage::InMemoryKv;
use mailing_list_service::committee_consumer::CommitteeConsumer;
use mailing_list_service::config::Config;
use mailing_list_service::logging;
use mailing_list_service::rest;
use mailing_list_service::state::AppState;
use tokio::sync::watch;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    logging::init(&config.log_level);

    // §Ambient 4.8: the `Bus`/`KvStore`/`GroupsIoClient` traits are the
    // deliverable; a real NATS/HTTP transport is out of scope (§1), so the
    // binary runs the in-process fakes as its backing implementations.
    let kv = Arc::new(InMemoryKv::new());
    let bus = Arc::new(InMemoryBus::new());
    let provider = Arc::new(MockGroupsIoClient::new());
    let webhook_secret = config.groupsio_webhook_secret.clone().into_bytes();
    let state = AppState::new(kv, bus, provider, webhook_secret);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = CommitteeConsumer::new(state.clone());
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    log::info!("binding REST API on {}", config.bind_address);
    let bind_address = config.bind_address.clone();
    let http_workers = config.http_workers;
    let app_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .configure(rest::configure)
    })
    .workers(http_workers)
    .bind(&bind_address)?
    .run();

    let server_result = server.await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = consumer_handle.await {
        log::error!("committee consumer task panicked: {err}");
    }

    server_result?;
    Ok(())
}
