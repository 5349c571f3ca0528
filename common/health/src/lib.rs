use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::warn;

/// Liveness reporting for the long-running loops of a service.
///
/// Each loop registers a component and must keep reporting healthy more
/// often than its deadline. The process is healthy when every registered
/// component reported healthy recently. A component that misses its
/// deadline shows up as `Stalled`, one that reported `Unhealthy` (e.g. after
/// a fatal broker error) keeps failing the probe until the process restarts.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        if self.healthy {
            (StatusCode::OK, body).into_response()
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, before the first report
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// The HealthyUntil deadline passed without a new report
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentStatus::HealthyUntil(until) if *until > OffsetDateTime::now_utc())
    }
}

type Components = Arc<RwLock<BTreeMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // The probe keeps failing on a poisoned lock, which restarts the process
            Err(_) => warn!("poisoned health registry lock, dropped {} report", self.component),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a component in `Starting` state and returns the handle it reports through.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Overall status, usable directly as an axum handler response.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned health registry lock");
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: BTreeMap::new(),
        };

        for (name, component) in components.iter() {
            let component = match component {
                ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(component, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component);
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_starting_component_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        let _handle = registry.register("ingest", Duration::from_secs(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("ingest"),
            Some(&ComponentStatus::Starting)
        );
    }

    #[test]
    fn test_all_components_must_report() {
        let registry = HealthRegistry::new("liveness");
        let ingest = registry.register("ingest", Duration::from_secs(30));
        let producer = registry.register("kafka_producer", Duration::from_secs(30));

        ingest.report_healthy();
        assert!(!registry.get_status().healthy);

        producer.report_healthy();
        assert!(registry.get_status().healthy);

        producer.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("kafka_producer"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn test_missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("consumer", Duration::from_millis(10));
        handle.report_healthy();
        assert!(registry.get_status().healthy);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("consumer"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn test_status_response_codes() {
        let registry = HealthRegistry::new("liveness");
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        registry
            .register("ingest", Duration::from_secs(30))
            .report_healthy();
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::OK
        );
    }
}
