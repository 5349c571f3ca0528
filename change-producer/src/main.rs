use std::time::Duration;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use health::{ComponentStatus, HealthRegistry};
use serve_metrics::{serve, setup_metrics_routes, status_router};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use change_producer::config::Config;
use change_producer::ingest::run_ingest;
use change_producer::publisher::KafkaPublisher;
use change_producer::source::EventSource;

async fn wait_for_signal() -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };
    Ok(())
}

fn start_server(config: &Config, liveness: HealthRegistry) -> Result<JoinHandle<()>> {
    let router = status_router("change-producer", liveness);
    let router = if config.export_prometheus {
        setup_metrics_routes(router).context("failed to install metrics recorder")?
    } else {
        router
    };

    let bind = config.bind_address.clone();
    Ok(tokio::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve status endpoints on {}: {}", bind, e);
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .boxed();
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    info!("Configuration loaded: {:?}", config);
    if config.routes.is_empty() {
        warn!("no routes configured, no event will be published");
    }
    info!("routing events by type: {}", config.routes);

    let liveness = HealthRegistry::new("liveness");
    let ingest_health = liveness.register(
        "ingest",
        Duration::from_secs(config.ingest_liveness_deadline_secs),
    );
    let server = start_server(&config, liveness)?;
    info!("serving status endpoints on {}", config.bind_address);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match wait_for_signal().await {
                Ok(()) => {
                    info!("Shutting down gracefully...");
                    shutdown.cancel();
                }
                Err(e) => error!("failed to register signal handlers: {}", e),
            }
        });
    }

    let publisher = KafkaPublisher::connect(
        config.kafka.clone(),
        config.routes.clone(),
        config.kafka_client_id.clone(),
    )
    .await
    .context("failed to reach Kafka brokers")?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.stream_connect_timeout_secs))
        .build()
        .context("failed to build http client")?;

    let mut source = tokio::select! {
        _ = shutdown.cancelled() => {
            server.abort();
            return Ok(());
        }
        source = EventSource::open(&client, &config.stream_url, &config.user_agent) => source?,
    };

    let result = run_ingest(&mut source, &publisher, &ingest_health, shutdown).await;
    server.abort();

    match result {
        Ok(stats) => {
            info!(
                "ingest stopped: {} frames, {} published, {} not published, {} undecodable",
                stats.frames, stats.published, stats.not_published, stats.decode_errors
            );
            Ok(())
        }
        Err(e) => {
            ingest_health.report_status(ComponentStatus::Unhealthy);
            error!("ingest failed: {}", e);
            Err(e).context("event stream lost, exiting for restart")
        }
    }
}
