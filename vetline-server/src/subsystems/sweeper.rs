use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use vetline_core::config::SessionConfig;

use super::gateway::Gateway;

/// Periodically apply acceptance and inactivity timeouts until shutdown.
pub async fn run_sweeper(gateway: Arc<Gateway>, config: SessionConfig, mut shutdown: broadcast::Receiver<()>) {
    let interval = tokio::time::Duration::from_secs(config.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Session sweeper started (interval: {}s, acceptance timeout: {}s, inactivity timeout: {}min)",
        interval.as_secs(),
        config.acceptance_timeout_secs,
        config.inactivity_timeout_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = gateway.sweep(Utc::now()).await;
                if report.is_empty() {
                    tracing::debug!("Sweep found nothing to do");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vetline_core::config::MatchingConfig;
    use vetline_core::{Assistant, ResponderDirectory};

    use crate::subsystems::notifier::InboxNotifier;

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let gateway = Arc::new(Gateway::new(
            Arc::new(ResponderDirectory::new()),
            Assistant::scripted(),
            Arc::new(InboxNotifier::new()),
            MatchingConfig::default(),
            SessionConfig::default(),
        ));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_sweeper(gateway, SessionConfig::default(), rx));

        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
