//! Shared progress state across the scheduler and telemetry loops.
//!
//! One [`ProgressTracker`] per active task, keyed by task id. The
//! scheduler feeds generator output lines in; the heartbeat loops read
//! fractions out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use easel_core::progress::{ProgressSignal, ProgressTracker};

/// Handle shared between the scheduler, the pipeline tasks, and the
/// telemetry loops.
pub type SharedProgressBoard = Arc<Mutex<ProgressBoard>>;

/// Lock the board, tolerating poisoning: progress is advisory state
/// and a panicked writer must not take the telemetry loops down.
pub fn lock(board: &SharedProgressBoard) -> MutexGuard<'_, ProgressBoard> {
    board.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-task progress trackers for everything currently generating.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    trackers: HashMap<i64, ProgressTracker>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a task with its sampler step budget, clearing
    /// any stale state under the same id.
    pub fn start(&mut self, task_id: i64, steps: u32) {
        self.trackers.insert(task_id, ProgressTracker::new(steps));
    }

    /// Feed one generator output line to a task's tracker.
    ///
    /// Returns `None` both for ordinary output and for unknown tasks.
    pub fn on_signal(&mut self, task_id: i64, line: &str) -> Option<ProgressSignal> {
        self.trackers.get_mut(&task_id)?.on_signal(line)
    }

    /// Stop tracking a task.
    pub fn remove(&mut self, task_id: i64) {
        self.trackers.remove(&task_id);
    }

    /// Completion fractions for every tracked task.
    pub fn snapshot(&self) -> Vec<(i64, f64)> {
        self.trackers
            .iter()
            .map(|(&task_id, tracker)| (task_id, tracker.progress()))
            .collect()
    }

    /// Single liveness figure for the `/poll` heartbeat: the mean over
    /// active tasks, 0 when idle.
    pub fn overall(&self) -> f64 {
        if self.trackers.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trackers.values().map(ProgressTracker::progress).sum();
        sum / self.trackers.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_board_reports_zero() {
        assert_eq!(ProgressBoard::new().overall(), 0.0);
    }

    #[test]
    fn signals_route_to_the_right_task() {
        let mut board = ProgressBoard::new();
        board.start(1, 40);
        board.start(2, 40);
        board.on_signal(1, "10/40");
        board.on_signal(2, "30/40");

        let mut snapshot = board.snapshot();
        snapshot.sort_by_key(|&(id, _)| id);
        assert_eq!(snapshot.len(), 2);
        assert!((snapshot[0].1 - 0.25).abs() < 1e-9);
        assert!((snapshot[1].1 - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unknown_task_signals_are_dropped() {
        let mut board = ProgressBoard::new();
        assert_eq!(board.on_signal(99, "10/40"), None);
    }

    #[test]
    fn overall_is_the_mean_of_active_tasks() {
        let mut board = ProgressBoard::new();
        board.start(1, 40);
        board.start(2, 40);
        board.on_signal(1, "20/40");
        board.on_signal(2, "40/40");
        assert!((board.overall() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn removal_stops_tracking() {
        let mut board = ProgressBoard::new();
        board.start(1, 40);
        board.on_signal(1, "20/40");
        board.remove(1);
        assert!(board.snapshot().is_empty());
        assert_eq!(board.overall(), 0.0);
    }

    #[test]
    fn restart_clears_stale_state() {
        let mut board = ProgressBoard::new();
        board.start(1, 40);
        board.on_signal(1, "40/40");
        board.start(1, 20);
        assert_eq!(board.snapshot(), vec![(1, 0.0)]);
    }
}
