use std::time::Duration;

use anyhow::{Context, Result};
use common_kafka::kafka_consumer::create_kafka_consumer;
use health::{ComponentStatus, HealthRegistry};
use serve_metrics::{serve, setup_metrics_routes, status_router};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use change_consumer::config::Config;
use change_consumer::consumer::{run_consumer, KafkaLogSource};

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
    let router = status_router("change-consumer", liveness);
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

    let config = Config::init_with_defaults().context("failed to load configuration from env")?;
    info!("Configuration loaded: {:?}", config);

    let liveness = HealthRegistry::new("liveness");
    let consumer_health = liveness.register(
        "consumer",
        Duration::from_secs(config.consumer_liveness_deadline_secs),
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

    let consumer = create_kafka_consumer(&config.kafka, &config.consumer)
        .context("failed to create kafka consumer")?;
    let mut source = KafkaLogSource::new(consumer);

    let result = run_consumer(&mut source, config.poll_timeout(), &consumer_health, shutdown).await;
    server.abort();

    match result {
        Ok(stats) => {
            info!(
                "consumer stopped: {} idle polls, {} skipped messages",
                stats.idle_polls, stats.skipped
            );
            info!("Event counts by type: {}", stats.counters);
            Ok(())
        }
        Err(e) => {
            consumer_health.report_status(ComponentStatus::Unhealthy);
            Err(e).context("consumer stopped on a log error")
        }
    }
}
