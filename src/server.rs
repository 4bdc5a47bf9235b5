use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::monitor::ContinuousMonitor;
use crate::queue::TaskQueue;
use crate::services::Services;

pub struct AppState {
    pub services: Services,
    pub monitor: ContinuousMonitor,
    pub task_queue: RwLock<TaskQueue>,
    pub webhook_secret: String,
}

impl AppState {
    pub fn new(services: Services) -> Result<Self> {
        let webhook_secret = services
            .config
            .webhook_secret()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("github.webhook_secret is required for serve".to_string()))?
            .to_string();
        let autofix = Arc::new(services.autofix_engine(None));
        let monitor = ContinuousMonitor::new(autofix, &services.config.monitor);

        Ok(Self {
            services,
            monitor,
            task_queue: RwLock::new(TaskQueue::new()),
            webhook_secret,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route("/health", axum::routing::get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    queued: usize,
    monitored: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Health> {
    let queued = state.task_queue.read().await.len();
    let monitored = state.monitor.tracked().len();
    Json(Health {
        status: "ok",
        queued,
        monitored,
    })
}

/// Poll tracked pull requests every `interval`, one cycle per tick.
pub async fn run_monitor_loop(state: Arc<AppState>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Monitor loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if state.monitor.tracked().is_empty() {
            continue;
        }
        for report in state.monitor.run_monitoring_cycle(1).await {
            tracing::info!(prs = report.outcomes.len(), "Monitor cycle finished");
        }
    }
}
