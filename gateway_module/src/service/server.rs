use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::info;

use mail_graph_module::{GraphMailClient, MailProvider};
use triage_module::{OpenAiTriageClient, TriageModel};

use crate::classification_queue::{ClassificationQueue, MemoryClassificationQueue};
use crate::dedup_store::{DedupClaimStore, MemoryDedupStore, PostgresDedupStore};
use crate::postgres_queue::PostgresClassificationQueue;
use crate::postgres_ticket_store::PostgresTicketStore;
use crate::ticket_store::{MemoryTicketStore, TicketStore};

use super::api;
use super::config::{ServiceConfig, StoreBackend};
use super::state::AppState;
use super::subscription::{spawn_subscription_renewal, RENEWAL_INTERVAL};
use super::webhook;
use super::worker::spawn_classification_worker;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);

    let backend_config = config.clone();
    let (store, dedup, queue): (
        Arc<dyn TicketStore>,
        Arc<dyn DedupClaimStore>,
        Arc<dyn ClassificationQueue>,
    ) = task::spawn_blocking(move || build_stores(&backend_config))
        .await
        .map_err(|err| -> BoxError { err.into() })??;

    let mail: Arc<dyn MailProvider> = Arc::new(
        task::spawn_blocking(GraphMailClient::from_env)
            .await
            .map_err(|err| -> BoxError { err.into() })??,
    );
    let directory = config.team_directory.clone();
    let model: Arc<dyn TriageModel> = Arc::new(
        task::spawn_blocking(move || OpenAiTriageClient::from_env(directory))
            .await
            .map_err(|err| -> BoxError { err.into() })?,
    );

    let mut worker = spawn_classification_worker(
        store.clone(),
        model.clone(),
        queue.clone(),
        config.worker_poll_interval,
    );

    let mut renewal = config.webhook_public_url.clone().map(|webhook_url| {
        spawn_subscription_renewal(mail.clone(), webhook_url, RENEWAL_INTERVAL)
    });
    if renewal.is_none() {
        info!("WEBHOOK_PUBLIC_URL not set; subscription renewal disabled");
    }

    let state = AppState {
        config: config.clone(),
        store,
        dedup,
        queue,
        mail,
        model,
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("support mail service listening on {}", addr);

    let app = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook", post(webhook::receive_notifications))
        .route("/tickets", get(api::list_tickets))
        .route(
            "/tickets/:id",
            get(api::get_ticket).patch(api::patch_ticket),
        )
        .route("/tickets/:id/reply", post(api::send_reply))
        .route("/tickets/:id/draft", post(api::regenerate_draft))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.inbound_body_max_bytes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    worker.stop_and_join();
    if let Some(renewal) = renewal.as_mut() {
        renewal.stop_and_join();
    }
    serve_result?;
    Ok(())
}

fn build_stores(
    config: &ServiceConfig,
) -> Result<
    (
        Arc<dyn TicketStore>,
        Arc<dyn DedupClaimStore>,
        Arc<dyn ClassificationQueue>,
    ),
    BoxError,
> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("using in-memory stores; state is lost on restart");
            Ok((
                Arc::new(MemoryTicketStore::new()),
                Arc::new(MemoryDedupStore::with_retention(config.dedup_retention)),
                Arc::new(MemoryClassificationQueue::with_timing(
                    config.queue_lease,
                    std::time::Duration::from_secs(5),
                    config.queue_max_attempts,
                )),
            ))
        }
        StoreBackend::Postgres => {
            let db_url = config
                .db_url
                .as_deref()
                .ok_or("postgres backend requires TICKET_DB_URL/DATABASE_URL")?;
            Ok((
                Arc::new(PostgresTicketStore::new_from_url(db_url)?),
                Arc::new(PostgresDedupStore::new(
                    db_url,
                    "dedup_claims",
                    config.dedup_retention,
                )?),
                Arc::new(PostgresClassificationQueue::new(
                    db_url,
                    "classification_jobs",
                    config.queue_lease,
                    config.queue_max_attempts,
                )?),
            ))
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
