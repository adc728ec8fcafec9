//! Background loops: recording polling, presence reconciliation, and the
//! public-mode retention sweep.

use std::sync::Arc;
use std::time::Duration;

use rf_broadcast::EventBroadcaster;
use rf_domain::config::Config;
use rf_pipeline::presence::PresenceReconciler;
use rf_pipeline::reconcile::Reconciler;
use rf_store::Stores;
use rf_workflow::Dispatcher;

use crate::platform::HttpPlatformClient;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub fn spawn_all(
    config: &Config,
    stores: &Stores,
    broadcaster: &EventBroadcaster,
    dispatcher: &Dispatcher,
    deps: &rf_pipeline::PipelineDeps,
    platform: Arc<HttpPlatformClient>,
) {
    spawn_recording_poller(config, stores, dispatcher, platform.clone());
    spawn_presence_loop(config, stores, broadcaster, platform);
    if config.retention.public_mode {
        spawn_retention_sweep(config, deps);
    }
}

fn spawn_recording_poller(
    config: &Config,
    stores: &Stores,
    dispatcher: &Dispatcher,
    platform: Arc<HttpPlatformClient>,
) {
    let reconciler = Reconciler::new(
        stores.clone(),
        dispatcher.clone(),
        config.polling.match_window_hours,
    );
    let interval = Duration::from_secs(config.polling.recording_interval_secs);
    let lookback = config.polling.recording_lookback_hours;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match reconciler.poll(platform.as_ref(), lookback).await {
                Ok(outcomes) if !outcomes.is_empty() => {
                    tracing::info!(reconciled = outcomes.len(), "recording poll complete");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "recording poll failed"),
            }
        }
    });
}

fn spawn_presence_loop(
    config: &Config,
    stores: &Stores,
    broadcaster: &EventBroadcaster,
    platform: Arc<HttpPlatformClient>,
) {
    let reconciler =
        PresenceReconciler::new(stores.clone(), broadcaster.clone(), platform);
    let interval = Duration::from_secs(config.presence.reconcile_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.process_meetings().await {
                tracing::error!(error = %e, "presence reconcile pass failed");
            }
        }
    });
}

fn spawn_retention_sweep(config: &Config, deps: &rf_pipeline::PipelineDeps) {
    let deps = deps.clone();
    let retention_days = config.retention.public_data_retention_days;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match rf_pipeline::cleanup::retention_sweep(&deps, retention_days).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(swept = count, "retention sweep complete"),
                Err(e) => tracing::error!(error = %e, "retention sweep failed"),
            }
        }
    });
}
