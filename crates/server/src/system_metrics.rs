//! Periodic process CPU and memory sampling

use crate::api::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Refresh the process usage gauges every `period` until shutdown
pub async fn run(
    state: Arc<AppState>,
    period: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    info!(interval_secs = period.as_secs(), "Starting process usage sampler");

    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.sampler.sample().await {
                    Ok(sample) => state.metrics.set_process_usage(&sample),
                    Err(e) => debug!(error = %e, "Process usage sample failed"),
                }
            }
            _ = shutdown.recv() => {
                info!("Process usage sampler stopped");
                break;
            }
        }
    }
}
