//! Operator alerts derived from subscription backlogs.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use super::{Result, SubscriptionMonitor, Topology};

/// Default age at which an unacked message means the consumers are stuck.
const DEFAULT_MAX_UNACKED_AGE_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    pub max_unacked_age: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        HealthThresholds {
            max_unacked_age: Duration::from_secs(DEFAULT_MAX_UNACKED_AGE_SECS),
        }
    }
}

/// A condition an operator should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A dead-letter subscription holds messages.
    DeadLetterNotEmpty { subscription: String, backlog: usize },
    /// A main subscription has not acked its oldest message in time.
    StaleSubscription {
        subscription: String,
        oldest_unacked_age: Duration,
    },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::DeadLetterNotEmpty {
                subscription,
                backlog,
            } => write!(f, "dead-letter subscription {subscription} holds {backlog} message(s)"),
            Alert::StaleSubscription {
                subscription,
                oldest_unacked_age,
            } => write!(
                f,
                "oldest unacked message on {subscription} is {}s old",
                oldest_unacked_age.as_secs()
            ),
        }
    }
}

/// Checks every subscription in `topology` and logs each alert raised.
pub async fn check_health<M: SubscriptionMonitor>(
    monitor: &M,
    topology: &Topology,
    thresholds: &HealthThresholds,
) -> Result<Vec<Alert>> {
    let mut alerts = Vec::new();

    for subscription in topology.dead_letter_subscriptions() {
        let stats = monitor.subscription_stats(subscription).await?;
        if stats.backlog() > 0 {
            alerts.push(Alert::DeadLetterNotEmpty {
                subscription: subscription.to_string(),
                backlog: stats.backlog(),
            });
        }
    }

    for subscription in topology.main_subscriptions() {
        let stats = monitor.subscription_stats(subscription).await?;
        if let Some(age) = stats.oldest_unacked_age
            && age > thresholds.max_unacked_age
        {
            alerts.push(Alert::StaleSubscription {
                subscription: subscription.to_string(),
                oldest_unacked_age: age,
            });
        }
    }

    for alert in &alerts {
        warn!(%alert, "pipeline health alert");
    }
    Ok(alerts)
}
