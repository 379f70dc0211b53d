//! Readiness reporting for the store and the kiosk channel.
//!
//! A venue with no kiosk online can still take bookings and payments, so the kiosk
//! check only ever degrades the report. Only an unreachable store takes the service
//! out of rotation.

use crate::kiosk::UnlockCoordinator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use simbay_core::store::Store;

/// Readiness of one component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operational
    Healthy,
    /// Serving, but kiosks cannot be reached
    Degraded,
    /// Not serving
    Unhealthy,
}

/// Result of probing one component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// `store` or `kiosks`
    pub component: &'static str,
    /// Check result
    pub status: HealthStatus,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Open kiosk channels, for the kiosk check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,
}

/// Readiness report served on `/health/ready`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status across `checks`
    pub status: HealthStatus,
    /// Per-component results
    pub checks: Vec<HealthCheck>,
    /// Check time
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    fn from_checks(checks: Vec<HealthCheck>, timestamp: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            timestamp,
        }
    }

    /// Whether the load balancer should keep routing here
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.status < HealthStatus::Unhealthy
    }
}

async fn check_store(store: &dyn Store) -> HealthCheck {
    let (status, message) = match store.ping().await {
        Ok(()) => (HealthStatus::Healthy, None),
        Err(err) => {
            tracing::warn!(error = %err, "Store ping failed");
            (HealthStatus::Unhealthy, Some(err.to_string()))
        },
    };
    HealthCheck {
        component: "store",
        status,
        message,
        connections: None,
    }
}

fn check_kiosks(coordinator: &UnlockCoordinator) -> HealthCheck {
    let connections = coordinator.connection_count();
    let (status, message) = if connections == 0 {
        (HealthStatus::Degraded, Some("no kiosk connected".to_string()))
    } else {
        (HealthStatus::Healthy, None)
    };
    HealthCheck {
        component: "kiosks",
        status,
        message,
        connections: Some(connections),
    }
}

/// Checks every component.
pub async fn report(
    store: &dyn Store,
    coordinator: &UnlockCoordinator,
    now: DateTime<Utc>,
) -> HealthReport {
    HealthReport::from_checks(vec![check_store(store).await, check_kiosks(coordinator)], now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kiosk::CoordinatorSettings;
    use simbay_core::environment::Clock;
    use simbay_testing::{test_clock, InMemoryStore};

    #[test]
    fn worst_check_sets_the_overall_status() {
        let now = test_clock().now();
        let coordinator = UnlockCoordinator::new(CoordinatorSettings::default());
        let kiosks = check_kiosks(&coordinator);
        assert_eq!(kiosks.connections, Some(0));

        let report = HealthReport::from_checks(vec![kiosks], now);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(HealthReport::from_checks(Vec::new(), now).is_serving());
    }

    #[tokio::test]
    async fn unreachable_store_makes_report_unhealthy() {
        let store = InMemoryStore::new();
        let coordinator = UnlockCoordinator::new(CoordinatorSettings::default());

        let ok = report(&store, &coordinator, test_clock().now()).await;
        assert_eq!(ok.status, HealthStatus::Degraded);
        assert!(ok.is_serving());

        store.set_ping_failure(true);
        let down = report(&store, &coordinator, test_clock().now()).await;
        assert_eq!(down.status, HealthStatus::Unhealthy);
        assert!(!down.is_serving());
        assert!(down.checks[0].message.is_some());
    }
}
