//! Demo server: one product registration, health and metrics routes, and
//! graceful shutdown on SIGINT/SIGTERM.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use clap::Parser;
use parking_lot::RwLock;
use sencillo_core::ClientError;
use sencillo_server::{
    handle_with_context, init_tracing, HttpConfig, HttpRequest, HttpServer, Logger, LoggingConfig,
    MetricsExporter, Registration, Route, ShutdownConfig, ShutdownCoordinator,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
#[command(name = "sencillo-demo", about = "Sencillo demo HTTP server")]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    /// error, info or debug
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    id: String,
    name: String,
}

type Catalog = Arc<RwLock<HashMap<String, Product>>>;

fn path_id(request: &HttpRequest) -> anyhow::Result<String> {
    request
        .request
        .uri()
        .path()
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ClientError::msg(400, "missing product id").into())
}

async fn get_product(request: HttpRequest, catalog: Catalog) -> anyhow::Result<Response> {
    let id = path_id(&request)?;
    let product = catalog
        .read()
        .get(&id)
        .cloned()
        .ok_or_else(|| ClientError::msg(404, format!("product {id} not found")))?;
    request.logger.debug(format_args!("found product {id}"));
    Ok(Json(product).into_response())
}

async fn put_product(request: HttpRequest, catalog: Catalog) -> anyhow::Result<Response> {
    let id = path_id(&request)?;
    let body = axum::body::to_bytes(request.request.into_body(), 64 * 1024).await?;
    let mut product: Product = serde_json::from_slice(&body)
        .map_err(|err| ClientError::new(err, 400))?;
    product.id.clone_from(&id);
    catalog.write().insert(id, product.clone());
    Ok((StatusCode::CREATED, Json(product)).into_response())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&LoggingConfig {
        level: args.log_level.clone(),
        json: args.json_logs,
    })?;

    let logger = Logger::new("sencillo-demo");
    let exporter = MetricsExporter::new()?;
    let catalog: Catalog = Arc::default();

    let mut server = HttpServer::new(
        HttpConfig {
            host: args.host,
            port: args.port,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            ..HttpConfig::default()
        },
        logger.clone(),
        exporter,
    );
    server.register(
        Registration::new("/api/v1")
            .route(Route::get(
                "/products/{id}",
                handle_with_context(get_product, Arc::clone(&catalog)),
            ))
            .route(Route::put(
                "/products/{id}",
                handle_with_context(put_product, Arc::clone(&catalog)),
            )),
    )?;
    server.start().await?;

    let transport = server.transport();
    let mut coordinator = ShutdownCoordinator::new(
        ShutdownConfig {
            timeout: Duration::from_secs(args.shutdown_timeout_secs),
        },
        logger,
    );
    coordinator.watch_os_signals();
    coordinator.watch_transport(server.serve());
    coordinator.run_and_exit(&[&transport]).await;
    Ok(())
}
