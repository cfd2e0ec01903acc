use crate::cli::ServeArgs;
use crate::infra::{in_memory_desk, AppState};
use crate::routes::with_sale_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use sale_desk::config::AppConfig;
use sale_desk::error::AppError;
use sale_desk::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;
    for warning in config.sales.warnings() {
        warn!(%warning, "sale desk configuration");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let desk = in_memory_desk(&config.sales);

    let app = with_sale_routes(desk.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        autosave_secs = config.sales.autosave_interval.as_secs(),
        "sale desk ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
