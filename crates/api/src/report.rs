//! Terminal-state reporting policy.
//!
//! The worker never reports success for a task it believes failed, and
//! a failed success upload cascades into a failure report so the
//! server is always told *something* about every task it handed out.
//! Failure reports themselves are fire-and-forget: a failure there is
//! logged and dropped rather than retried, to avoid retry storms.

use std::path::Path;

use easel_core::task::{TaskRecord, TaskStatus};

use crate::client::ApiClient;

/// Which endpoint a terminal task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRoute {
    /// Upload the image artifact with the nsfw flag.
    Complete { nsfw: bool },
    /// Upload the print-format artifact.
    PrintComplete,
    /// Report the task as failed.
    Failed,
}

impl ReportRoute {
    /// Decide the route from the worker's own view of the task.
    pub fn for_task(task: &TaskRecord) -> Self {
        if task.status != TaskStatus::Done {
            ReportRoute::Failed
        } else if task.to_print {
            ReportRoute::PrintComplete
        } else {
            ReportRoute::Complete { nsfw: task.nsfw }
        }
    }
}

/// Report a terminal task to the server.
///
/// Never returns an error: every failure path ends in a logged
/// best-effort failure report, and cleanup must proceed regardless.
pub async fn report_outcome(api: &ApiClient, task: &TaskRecord, image: &Path, print: &Path) {
    match ReportRoute::for_task(task) {
        ReportRoute::Failed => {
            report_failed(api, task.task_id).await;
        }
        ReportRoute::PrintComplete => {
            match api.report_print_complete(task.task_id, print).await {
                Ok(()) => {
                    tracing::info!(task_id = task.task_id, "Print task reported as done and uploaded");
                }
                Err(e) => {
                    tracing::error!(task_id = task.task_id, error = %e, "Print upload failed, reporting task as failed");
                    report_failed(api, task.task_id).await;
                }
            }
        }
        ReportRoute::Complete { nsfw } => {
            match api.report_complete(task.task_id, nsfw, image).await {
                Ok(()) => {
                    tracing::info!(task_id = task.task_id, "Task reported as done and uploaded");
                }
                Err(e) => {
                    tracing::error!(task_id = task.task_id, error = %e, "Upload failed, reporting task as failed");
                    report_failed(api, task.task_id).await;
                }
            }
        }
    }
}

/// Best-effort failure report; never retried.
pub async fn report_failed(api: &ApiClient, task_id: i64) {
    match api.report_failed(task_id).await {
        Ok(()) => tracing::warn!(task_id, "Task reported as failed"),
        Err(e) => {
            tracing::error!(task_id, error = %e, "Could not report task failure, is the server down?");
        }
    }
}
