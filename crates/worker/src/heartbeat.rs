//! Liveness and progress telemetry loops.
//!
//! Both loops are fire-and-forget and independent of task execution:
//! a failed heartbeat never touches the task queue, it just backs off
//! and tries again. Both stop at the next tick after cancellation.

use std::sync::Arc;
use std::time::Duration;

use easel_api::ApiClient;
use tokio_util::sync::CancellationToken;

use crate::board::{self, SharedProgressBoard};

/// Interval between telemetry sends.
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Extra delay after a failed send.
const TELEMETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Periodic `GET /poll` liveness heartbeat carrying overall progress.
pub async fn poll_loop(api: Arc<ApiClient>, board: SharedProgressBoard, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(TELEMETRY_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let progress = board::lock(&board).overall();
        if let Err(e) = api.poll(progress).await {
            tracing::warn!(error = %e, "Polling failed, is the server down?");
            tokio::time::sleep(TELEMETRY_BACKOFF).await;
        }
    }
}

/// Periodic `GET /progress_update/{task_id}` for every active task.
pub async fn progress_loop(
    api: Arc<ApiClient>,
    board: SharedProgressBoard,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(TELEMETRY_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let snapshot = board::lock(&board).snapshot();
        for (task_id, progress) in snapshot {
            if let Err(e) = api.progress_update(task_id, progress).await {
                tracing::warn!(task_id, error = %e, "Reporting progress failed, is the server down?");
                tokio::time::sleep(TELEMETRY_BACKOFF).await;
                break;
            }
        }
    }
}
