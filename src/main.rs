use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use health_assist::config::AppConfig;
use health_assist::flow::FlowRegistry;
use health_assist::grpc::FlowRunnerService;
use health_assist::llm::{LlmClient, ModelBackend};
use health_assist::server::{build_router, AppState};
use health_assist::storage::open_store;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serves the REST API and the gRPC `FlowRunner` side by side over one
/// flow registry and one document store.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::parse();
    config.validate()?;

    let llm = LlmClient::new(config.llm_settings()).context("failed to set up model client")?;
    info!(provider = llm.provider().as_str(), model = llm.model(), "model backend ready");
    let backend: Arc<dyn ModelBackend> = Arc::new(llm);

    let policy = config.invocation_policy();
    info!(
        timeout_secs = policy.timeout.as_secs(),
        max_attempts = policy.max_attempts,
        "invocation policy"
    );
    let flows = FlowRegistry::new(backend, policy);

    let store = open_store(&config.storage_settings())
        .await
        .context("failed to open document store")?;
    info!(backend = store.backend_name(), "document store ready");

    let share_token = config.share_token();
    if share_token.is_some() {
        info!("document sharing enabled");
    }

    let app = build_router(AppState {
        flows: flows.clone(),
        store,
        share_token,
    });

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!("REST listening on {}", config.http_addr);
    info!("gRPC listening on {}", config.grpc_addr);

    let rest = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("REST server failed")
    };
    let grpc = async {
        Server::builder()
            .add_service(FlowRunnerService::new(flows).into_server())
            .serve_with_shutdown(config.grpc_addr, shutdown_signal())
            .await
            .context("gRPC server failed")
    };

    tokio::try_join!(rest, grpc)?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until killed.
        std::future::pending::<()>().await;
    }
}
