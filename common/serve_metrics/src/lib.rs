use std::future::ready;

use axum::{routing::get, Router};
use health::HealthRegistry;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::error;

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Index, readiness and liveness routes for a service. Liveness fails while
/// any component of the registry is unhealthy.
pub fn status_router(service_name: &'static str, liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(move || ready(service_name)))
        .route("/_readiness", get(|| ready("ok")))
        .route(
            "/_liveness",
            get(move || {
                let status = liveness.get_status();
                if !status.healthy {
                    let unhealthy: Vec<String> = status
                        .components
                        .iter()
                        .filter(|(_, component)| !component.is_healthy())
                        .map(|(name, component)| format!("{name}: {component:?}"))
                        .collect();
                    error!(
                        "{} check FAILED - unhealthy components: [{}]",
                        liveness.name(),
                        unhealthy.join(", ")
                    );
                }
                ready(status)
            }),
        )
}

/// Add the prometheus endpoint to a router. Installs the global recorder, so
/// call it once per process.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = PrometheusBuilder::new().install_recorder()?;

    Ok(router.route("/metrics", get(move || ready(recorder_handle.render()))))
}
