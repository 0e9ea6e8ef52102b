//! HTTP order-entry and market-data query surface.
//!
//! The wire protocol is a collaborator of the engine, not part of it: this
//! layer translates validated requests into strongly typed engine calls and
//! maps typed engine errors back to JSON responses. The engine itself is
//! single-threaded, so handlers serialize access through a mutex before
//! entering it.

use crate::config;
use crate::engine::Engine;
use crate::events::MarketEvent;
use axum::body::Body;
use axum::routing::get;
use axum::Router;
use http::{HeaderName, Request};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::{HttpMakeClassifier, TraceLayer};
use tracing::{info_span, Span};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod book;
mod error;
mod orders;

/// Shared handler state: one engine behind a mutex.
pub type EngineHandle = Arc<Mutex<Engine>>;

/// Lock the engine, recovering the guard if a previous handler panicked
/// while holding it (the engine halts itself on real corruption).
pub(crate) fn lock_engine(engine: &EngineHandle) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Header carrying the per-request correlation id.
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Sequential request ids prefixed with the traded symbol, so logs from
/// engines running side by side stay distinguishable.
#[derive(Clone)]
struct RequestSeq {
    symbol: Arc<str>,
    next: Arc<AtomicU64>,
}

impl RequestSeq {
    fn new(symbol: &str) -> Self {
        RequestSeq {
            symbol: Arc::from(symbol),
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl MakeRequestId for RequestSeq {
    fn make_request_id<B>(&mut self, _: &Request<B>) -> Option<RequestId> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{n}", self.symbol);
        Some(RequestId::from(http::HeaderValue::from_str(&id).ok()?))
    }
}

/// One span per request, named by method and path and tagged with the
/// correlation id set by [`RequestSeq`].
fn trace_requests() -> TraceLayer<HttpMakeClassifier, impl Fn(&Request<Body>) -> Span + Clone> {
    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            request_id,
        )
    })
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Matchbook API", version = "1.0.0"),
    nest(
        (path = "/api/v1", api = orders::OrdersApi),
        (path = "/api/v1", api = book::BookApi)
    )
)]
pub struct ApiDoc;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to setup Prometheus recorder: {0}")]
    PrometheusSetup(#[from] metrics_exporter_prometheus::BuildError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn start(
    cfg: &config::AppConfig,
    cancellation_token: CancellationToken,
) -> Result<(), ApiError> {
    let limits = cfg.risk.limits().map_err(ApiError::Config)?;
    let mut engine = Engine::with_capacity(cfg.engine.symbol.clone(), limits, cfg.engine.capacity);
    engine.subscribe(record_event_metrics);
    let engine: EngineHandle = Arc::new(Mutex::new(engine));

    let api_router = Router::new()
        .merge(orders::router())
        .merge(book::router())
        .with_state(engine);

    let prom_handle = PrometheusBuilder::new().install_recorder()?;
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health))
        .route("/metrics", get(|| async move { prom_handle.render() }))
        .nest("/api/v1", api_router)
        .layer(CorsLayer::permissive())
        .layer(trace_requests())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
        .layer(SetRequestIdLayer::new(
            REQUEST_ID_HEADER.clone(),
            RequestSeq::new(&cfg.engine.symbol),
        ));

    let listener = tokio::net::TcpListener::bind((cfg.api.host.clone(), cfg.api.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
        })
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// Feed Prometheus counters from the engine's market-data stream.
fn record_event_metrics(event: &MarketEvent) {
    match event {
        MarketEvent::Trade { trade, .. } => {
            metrics::counter!("matchbook_trades_total").increment(1);
            metrics::counter!("matchbook_traded_quantity_total").increment(trade.quantity);
        }
        MarketEvent::Delta(_) => {
            metrics::counter!("matchbook_book_deltas_total").increment(1);
        }
        MarketEvent::Best(_) => {
            metrics::counter!("matchbook_best_price_updates_total").increment(1);
        }
    }
}
