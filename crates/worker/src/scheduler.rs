//! Task acquisition, dispatch, and reporting.
//!
//! The [`Scheduler`] owns the queue, the slot pool, and the outcome
//! channel; nothing here is global. Each 1s tick it (1) drains
//! finished generations, (2) reports and removes terminal tasks,
//! (3) asks the server for more work while the queue has room, and
//! (4) dispatches ready tasks onto free slots. Per-task work
//! (download inputs, generate, validate the artifact) runs in a
//! spawned pipeline task that hands its result back over the channel,
//! so a long generation never blocks the housekeeping tick.
//!
//! Failure policy per layer: transport failures back off and retry on
//! a later tick; malformed descriptors discard that one job; a failed
//! generation forces the task to `Error` and routes it through the
//! failure report. None of these stop the loop.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use easel_api::{report, ApiClient};
use easel_core::progress::ProgressSignal;
use easel_core::slots::SlotPool;
use easel_core::task::{TaskRecord, TaskStatus, UNASSIGNED};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::board::{self, SharedProgressBoard};
use crate::generate::{self, GenerateError, GenerateRequest, Generator};
use crate::scratch::ScratchSet;

/// Housekeeping tick.
const TICK: Duration = Duration::from_secs(1);

/// Backoff after a failed task request ("retrying in ~10 seconds"
/// including the following tick).
const ACQUIRE_BACKOFF: Duration = Duration::from_secs(9);

/// Backoff when every compute slot is busy.
const SLOT_BACKOFF: Duration = Duration::from_secs(5);

/// A queued task and the scratch files it owns.
struct ActiveTask {
    record: TaskRecord,
    scratch: ScratchSet,
}

/// Result of one pipeline run, handed back over the outcome channel.
#[derive(Debug)]
struct TaskOutcome {
    task_id: i64,
    slot: usize,
    result: Result<(), GenerateError>,
}

/// Owns the queue and the slot pool; drives the whole worker.
pub struct Scheduler {
    api: Arc<ApiClient>,
    generator: Arc<dyn Generator>,
    slots: SlotPool,
    queue: VecDeque<ActiveTask>,
    board: SharedProgressBoard,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    max_queue: usize,
}

impl Scheduler {
    pub fn new(
        api: Arc<ApiClient>,
        generator: Arc<dyn Generator>,
        slots: SlotPool,
        board: SharedProgressBoard,
        max_queue: usize,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            api,
            generator,
            slots,
            queue: VecDeque::new(),
            board,
            outcome_tx,
            outcome_rx,
            max_queue,
        }
    }

    /// Run until cancelled. On cancellation, every task the server
    /// still believes is in flight is best-effort reported as failed
    /// before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }
                _ = ticker.tick() => {}
            }

            self.drain_outcomes();
            self.reap_terminal().await;
            if self.queue.len() < self.max_queue {
                self.acquire_task().await;
            }
            self.dispatch().await;
        }
    }

    /// Apply finished generations: terminal status, slot back to the
    /// pool. The slot is released even when the task has vanished.
    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.slots.release(outcome.slot);

            let Some(task) = self
                .queue
                .iter_mut()
                .find(|t| t.record.task_id == outcome.task_id)
            else {
                tracing::warn!(task_id = outcome.task_id, "Outcome for unknown task");
                continue;
            };
            task.record.gpu_slot = UNASSIGNED;

            let to = match &outcome.result {
                Ok(()) => {
                    tracing::info!(task_id = outcome.task_id, "Task finished successfully");
                    TaskStatus::Done
                }
                Err(e) => {
                    tracing::error!(task_id = outcome.task_id, error = %e, "Task seems to have failed");
                    TaskStatus::Error
                }
            };
            if let Err(e) = task.record.transition(to) {
                tracing::error!(error = %e, "Unexpected state on completion, forcing error");
                task.record.status = TaskStatus::Error;
            }
        }
    }

    /// Report and remove terminal tasks. Scratch files are released
    /// here, exactly once, whether or not the report went through.
    async fn reap_terminal(&mut self) {
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        while let Some(task) = self.queue.pop_front() {
            if !task.record.status.is_terminal() {
                remaining.push_back(task);
                continue;
            }
            report::report_outcome(
                &self.api,
                &task.record,
                task.scratch.image_path(),
                task.scratch.print_path(),
            )
            .await;
            board::lock(&self.board).remove(task.record.task_id);
            // ActiveTask drops here, releasing the scratch set.
        }
        self.queue = remaining;
    }

    /// Ask the server for one more job descriptor.
    async fn acquire_task(&mut self) {
        match self.api.request_task().await {
            Ok(Some(descriptor)) => self.enqueue(&descriptor),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Task request failed, is the server down? Backing off");
                tokio::time::sleep(ACQUIRE_BACKOFF).await;
            }
        }
    }

    fn enqueue(&mut self, descriptor: &serde_json::Value) {
        let scratch = match ScratchSet::new() {
            Ok(scratch) => scratch,
            Err(e) => {
                tracing::error!(error = %e, "Could not allocate scratch files, dropping job");
                return;
            }
        };
        match TaskRecord::from_descriptor(descriptor) {
            Ok(record) => {
                tracing::info!(task_id = record.task_id, "New task received, adding to queue");
                self.queue.push_back(ActiveTask { record, scratch });
            }
            Err(e) => {
                tracing::error!(error = %e, "Discarding malformed job descriptor");
            }
        }
    }

    /// Start every ready task a free slot can be found for.
    async fn dispatch(&mut self) {
        let mut spawns = Vec::new();
        let mut starved = false;

        for task in self.queue.iter_mut() {
            if !task.record.ready() {
                continue;
            }
            let Some(slot) = self.slots.acquire_first_free() else {
                tracing::debug!("No free compute slot, leaving tasks queued");
                starved = true;
                break;
            };
            if let Err(e) = task.record.transition(TaskStatus::Processing) {
                tracing::error!(error = %e, "Refusing to dispatch task");
                self.slots.release(slot);
                continue;
            }
            task.record.gpu_slot = slot as i64;
            board::lock(&self.board).start(task.record.task_id, task.record.steps);
            tracing::info!(
                task_id = task.record.task_id,
                slot,
                "Dispatching task to compute slot",
            );
            spawns.push((
                task.record.clone(),
                slot,
                task.scratch.image_path().to_path_buf(),
                task.scratch.input_path().to_path_buf(),
                task.scratch.mask_path().to_path_buf(),
                task.scratch.print_path().to_path_buf(),
            ));
        }

        for (record, slot, out, input, mask, print) in spawns {
            self.spawn_pipeline(record, slot, out, input, mask, print);
        }

        if starved {
            tokio::time::sleep(SLOT_BACKOFF).await;
        }
    }

    fn spawn_pipeline(
        &self,
        record: TaskRecord,
        slot: usize,
        out: PathBuf,
        input: PathBuf,
        mask: PathBuf,
        print: PathBuf,
    ) {
        let api = Arc::clone(&self.api);
        let generator = Arc::clone(&self.generator);
        let board = Arc::clone(&self.board);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let task_id = record.task_id;
            let result = run_pipeline(api, generator, board, record, out, input, mask, print).await;
            // The scheduler owns the receiving end for its whole life;
            // a send failure only happens during teardown.
            let _ = outcome_tx.send(TaskOutcome {
                task_id,
                slot,
                result,
            });
        });
    }

    /// Best-effort failure reports for everything still in flight.
    async fn shutdown(&mut self) {
        tracing::warn!("Stop requested, reporting unfinished tasks as failed");
        self.drain_outcomes();
        self.reap_terminal().await;
        while let Some(task) = self.queue.pop_front() {
            if task.record.task_id >= 0 {
                report::report_failed(&self.api, task.record.task_id).await;
            }
            board::lock(&self.board).remove(task.record.task_id);
        }
    }
}

/// One task's strictly-sequential pipeline:
/// download inputs, generate, validate the artifact(s).
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    api: Arc<ApiClient>,
    generator: Arc<dyn Generator>,
    board: SharedProgressBoard,
    record: TaskRecord,
    out: PathBuf,
    input: PathBuf,
    mask: PathBuf,
    print: PathBuf,
) -> Result<(), GenerateError> {
    let init_image = match &record.input_image_url {
        Some(url) => {
            api.download_file(url, &input)
                .await
                .map_err(|e| GenerateError::Download(e.to_string()))?;
            Some(input)
        }
        None => None,
    };
    let mask_image = match &record.mask_image_url {
        Some(url) => {
            api.download_file(url, &mask)
                .await
                .map_err(|e| GenerateError::Download(e.to_string()))?;
            Some(mask)
        }
        None => None,
    };

    let print_path = record.to_print.then_some(print);
    let request = GenerateRequest {
        record,
        out_path: out.clone(),
        init_image,
        mask_image,
        print_path: print_path.clone(),
    };

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let task_id = request.record.task_id;
    let pump = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            match board::lock(&board).on_signal(task_id, &line) {
                Some(ProgressSignal::Stage { stage, stage_max }) => {
                    tracing::info!(task_id, "Stage {stage} of {stage_max}");
                }
                Some(ProgressSignal::Step { step, total }) => {
                    tracing::debug!(task_id, "Sampler step {step} of {total}");
                }
                None => {
                    tracing::debug!(task_id, line = %line, "Generator output");
                }
            }
        }
    });

    let result = generator.generate(&request, line_tx).await;
    let _ = pump.await;
    result?;

    generate::validate_artifact(&out).await?;
    // A print task that never filled its print artifact is a failure,
    // not an upload of the empty scratch file.
    if let Some(print) = &print_path {
        generate::validate_artifact(print).await?;
    }
    Ok(())
}
