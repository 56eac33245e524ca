//! Generation progress tracking.
//!
//! The external generator emits free-text lines on stdout. Two shapes
//! are progress signals: `"STAGE:<i>/<max>"` announces post-processing
//! stages (face fixing, upscaling), and `"<step>/<total>"` counts
//! sampler steps inside the current stage. Everything else is ordinary
//! output and is left for the caller to log.
//!
//! The combined completion fraction weights the sampler step loop
//! against the fixed per-stage step budget:
//!
//! ```text
//! T        = steps + stage_steps * stage_max
//! progress = fraction * steps / T  +  stage * stage_steps / T
//! ```
//!
//! so it stays inside `[0, 1]` however many stages run. With no stages
//! announced, progress is the plain sampler fraction.

/// Sampler step budget assumed until a task provides its own.
pub const DEFAULT_STEP_BUDGET: u32 = 40;

/// Fixed step budget attributed to each post-processing stage.
pub const STAGE_STEP_BUDGET: u32 = 15;

const STAGE_PREFIX: &str = "STAGE:";

/// A recognised progress signal, returned so the caller can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    /// Entered post-processing stage `stage` of `stage_max`.
    Stage { stage: u32, stage_max: u32 },
    /// Sampler step `step` of `total` inside the current stage.
    Step { step: u32, total: u32 },
}

/// Per-task progress state fed from generator output lines.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    stage: u32,
    stage_max: u32,
    fraction: f64,
    steps: u32,
    stage_steps: u32,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_BUDGET)
    }
}

impl ProgressTracker {
    /// Create a tracker for a task with the given sampler step budget.
    pub fn new(steps: u32) -> Self {
        Self {
            stage: 0,
            stage_max: 0,
            fraction: 0.0,
            steps,
            stage_steps: STAGE_STEP_BUDGET,
        }
    }

    /// Clear all state and adopt a new sampler step budget.
    pub fn reset(&mut self, steps: u32) {
        self.stage = 0;
        self.stage_max = 0;
        self.fraction = 0.0;
        self.steps = steps;
    }

    /// Feed one raw output line.
    ///
    /// Returns the recognised signal, or `None` for ordinary output.
    /// Malformed payloads of a recognised shape never error: a bad
    /// stage payload resets the stage counters ("no stages known
    /// yet"), a bad step payload reads as fraction 0.
    pub fn on_signal(&mut self, line: &str) -> Option<ProgressSignal> {
        if let Some(payload) = line.strip_prefix(STAGE_PREFIX) {
            let (stage, stage_max) = parse_pair(payload).unwrap_or((0, 0));
            self.stage = stage;
            self.stage_max = stage_max;
            return Some(ProgressSignal::Stage { stage, stage_max });
        }

        if line.split('/').count() == 2 {
            let (step, total) = parse_pair(line).unwrap_or((0, 0));
            self.fraction = if total > 0 {
                (step as f64 / total as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            return Some(ProgressSignal::Step { step, total });
        }

        None
    }

    /// Current completion fraction in `[0, 1]`. Valid before any
    /// signal has arrived (0.0).
    pub fn progress(&self) -> f64 {
        if self.stage_max == 0 {
            return self.fraction;
        }
        let total = (self.steps + self.stage_steps * self.stage_max) as f64;
        if total <= 0.0 {
            return self.fraction;
        }
        self.fraction * self.steps as f64 / total + self.stage as f64 * self.stage_steps as f64 / total
    }
}

/// Parse `"<a>/<b>"` into two unsigned integers.
fn parse_pair(payload: &str) -> Option<(u32, u32)> {
    let (a, b) = payload.split_once('/')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn starts_at_zero() {
        assert_eq!(ProgressTracker::default().progress(), 0.0);
    }

    #[test]
    fn plain_fraction_without_stages() {
        let mut t = ProgressTracker::new(40);
        assert_eq!(t.on_signal("10/40"), Some(ProgressSignal::Step { step: 10, total: 40 }));
        assert!(close(t.progress(), 0.25));
    }

    #[test]
    fn stage_and_step_combine() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("STAGE:2/5");
        t.on_signal("10/40");
        // T = 40 + 15 * 5 = 115
        let expected = 0.25 * 40.0 / 115.0 + 2.0 * 15.0 / 115.0;
        assert!(close(t.progress(), expected));
    }

    #[test]
    fn combined_progress_never_exceeds_one() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("STAGE:5/5");
        t.on_signal("40/40");
        assert!(t.progress() <= 1.0);
    }

    #[test]
    fn malformed_stage_resets_counters() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("STAGE:2/5");
        assert_eq!(
            t.on_signal("STAGE:bogus"),
            Some(ProgressSignal::Stage { stage: 0, stage_max: 0 })
        );
        t.on_signal("10/40");
        assert!(close(t.progress(), 0.25));
    }

    #[test]
    fn malformed_step_reads_as_zero() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("10/40");
        assert_eq!(t.on_signal("a/b"), Some(ProgressSignal::Step { step: 0, total: 0 }));
        assert_eq!(t.progress(), 0.0);
    }

    #[test]
    fn zero_total_reads_as_zero() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("3/0");
        assert_eq!(t.progress(), 0.0);
    }

    #[test]
    fn step_fraction_clamps_to_one() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("50/40");
        assert!(close(t.progress(), 1.0));
    }

    #[test]
    fn unrecognised_lines_are_not_signals() {
        let mut t = ProgressTracker::new(40);
        assert_eq!(t.on_signal("loading weights"), None);
        assert_eq!(t.on_signal("a/b/c"), None);
        assert_eq!(t.progress(), 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = ProgressTracker::new(40);
        t.on_signal("STAGE:2/5");
        t.on_signal("20/40");
        t.reset(30);
        assert_eq!(t.progress(), 0.0);
        t.on_signal("15/30");
        assert!(close(t.progress(), 0.5));
    }
}
