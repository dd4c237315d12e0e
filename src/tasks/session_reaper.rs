use crate::handlers::Dispatcher;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

const CHECK_INTERVAL_SECONDS: u64 = 60; // Check every 60 seconds

/// Periodically drop conversations nobody answered for `max_idle`.
pub async fn evict_idle_conversations_task(dispatcher: Arc<Dispatcher>, max_idle: Duration) {
    info!(
        "Starting background task to evict conversations idle for {} minutes...",
        max_idle.as_secs() / 60
    );
    let mut interval = interval(Duration::from_secs(CHECK_INTERVAL_SECONDS));

    loop {
        interval.tick().await;
        let evicted = dispatcher.evict_idle(max_idle).await;
        if !evicted.is_empty() {
            info!(
                "Evicted {} idle conversation(s), {} still open.",
                evicted.len(),
                dispatcher.open_conversations().await
            );
        }
    }
}
