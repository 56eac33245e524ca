//! The task record and its state machine.
//!
//! [`TaskRecord::from_descriptor`] is the single point where a wire
//! job descriptor becomes a typed record. Only a missing `prompt` or
//! an untraceable `task_id` fails construction; every other field is
//! validated fail-open, falling back to its documented default so one
//! malformed optional field never discards an otherwise-valid job.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Sentinel for "no server-assigned task id" and "no slot held".
pub const UNASSIGNED: i64 = -1;

/// Prompt strength used when the descriptor omits or mangles it.
pub const DEFAULT_STRENGTH: f64 = 6.5;
/// Lower clamp bound for prompt strength.
pub const STRENGTH_MIN: f64 = 0.01;
/// Upper clamp bound for prompt strength.
pub const STRENGTH_MAX: f64 = 10.0;
/// Sampler step count fallback.
pub const DEFAULT_STEPS: u32 = 40;
/// Output dimension fallback; dimensions must be positive multiples
/// of 64 or both reset to this.
pub const DEFAULT_DIMENSION: u32 = 512;
/// Exclusive upper bound for the random seed fallback.
pub const SEED_FALLBACK_RANGE: i64 = 100_000;

/// Lifecycle of a task on this worker.
///
/// Legal transitions are `Idle -> Processing -> {Done, Error}` only.
/// Wire codes are shared with the server acks: Idle=0, Processing=1,
/// Done=2, Error=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Processing,
    Done,
    Error,
}

impl TaskStatus {
    /// Numeric code used on the wire.
    pub fn wire_code(self) -> i64 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::Processing => 1,
            TaskStatus::Done => 2,
            TaskStatus::Error => 3,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Idle, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Done)
                | (TaskStatus::Processing, TaskStatus::Error)
        )
    }
}

/// One unit of generation work, as understood by this worker.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: i64,
    pub prompt: String,
    pub strength: f64,
    pub steps: u32,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub upscale: bool,
    pub fix_faces: bool,
    pub tileable: bool,
    pub nsfw: bool,
    pub to_print: bool,
    pub input_image_url: Option<String>,
    pub mask_image_url: Option<String>,
    pub status: TaskStatus,
    /// Slot index held while `Processing`, [`UNASSIGNED`] otherwise.
    pub gpu_slot: i64,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            task_id: UNASSIGNED,
            prompt: String::new(),
            strength: DEFAULT_STRENGTH,
            steps: DEFAULT_STEPS,
            seed: 0,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            upscale: false,
            fix_faces: false,
            tileable: false,
            nsfw: false,
            to_print: false,
            input_image_url: None,
            mask_image_url: None,
            status: TaskStatus::Idle,
            gpu_slot: UNASSIGNED,
        }
    }
}

impl TaskRecord {
    /// Convert a wire job descriptor into a record.
    ///
    /// Fails with [`CoreError::Integrity`] iff `prompt` or `task_id`
    /// is absent, or `task_id` cannot be read as an integer. All other
    /// fields fall back to their defaults on any shape mismatch.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, CoreError> {
        let obj = descriptor
            .as_object()
            .ok_or_else(|| CoreError::Integrity("descriptor is not a JSON object".to_string()))?;

        let prompt = obj
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Integrity("prompt missing from descriptor".to_string()))?
            .to_string();

        let task_id = obj
            .get("task_id")
            .ok_or_else(|| CoreError::Integrity("task_id missing from descriptor".to_string()))
            .and_then(|v| {
                coerce_i64(v).ok_or_else(|| {
                    CoreError::Integrity(
                        "task_id is not an integer, no way to trace this back".to_string(),
                    )
                })
            })?;

        let strength = obj
            .get("prompt_strength")
            .and_then(coerce_f64)
            .map(|s| s.clamp(STRENGTH_MIN, STRENGTH_MAX))
            .unwrap_or(DEFAULT_STRENGTH);

        let steps = obj
            .get("steps")
            .and_then(coerce_i64)
            .and_then(|s| u32::try_from(s).ok())
            .filter(|&s| s > 0)
            .unwrap_or(DEFAULT_STEPS);

        let seed = obj
            .get("seed")
            .and_then(coerce_i64)
            .unwrap_or_else(|| rand::rng().random_range(0..SEED_FALLBACK_RANGE));

        let (width, height) = validate_dimensions(
            obj.get("width").and_then(coerce_i64),
            obj.get("height").and_then(coerce_i64),
        );

        Ok(Self {
            task_id,
            prompt,
            strength,
            steps,
            seed,
            width,
            height,
            upscale: coerce_toggle(obj.get("upscale")),
            fix_faces: coerce_toggle(obj.get("fix_faces")),
            tileable: coerce_toggle(obj.get("tileable")),
            nsfw: coerce_toggle(obj.get("nsfw")),
            to_print: coerce_toggle(obj.get("to_print")),
            input_image_url: non_empty_str(obj.get("input_image_url")),
            mask_image_url: non_empty_str(obj.get("mask_image_url")),
            status: TaskStatus::Idle,
            gpu_slot: UNASSIGNED,
        })
    }

    /// Eligible for dispatch: has a prompt, is traceable, and has not
    /// started yet.
    pub fn ready(&self) -> bool {
        !self.prompt.is_empty() && self.task_id >= 0 && self.status == TaskStatus::Idle
    }

    /// Apply a status transition, rejecting illegal ones.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition(to) {
            return Err(CoreError::Transition(format!(
                "task {}: {:?} -> {:?}",
                self.task_id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// Both dimensions must be supplied, fit in `u32`, and each be a
/// positive multiple of 64; anything else resets both to
/// [`DEFAULT_DIMENSION`] atomically.
fn validate_dimensions(width: Option<i64>, height: Option<i64>) -> (u32, u32) {
    let checked = |d: i64| u32::try_from(d).ok().filter(|&d| d > 0 && d % 64 == 0);
    match (width.and_then(checked), height.and_then(checked)) {
        (Some(w), Some(h)) => (w, h),
        _ => (DEFAULT_DIMENSION, DEFAULT_DIMENSION),
    }
}

/// Integers arrive as JSON numbers or numeric strings.
fn coerce_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Floats arrive as JSON numbers or numeric strings.
fn coerce_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Toggles are accepted only when boolean-typed on the wire.
fn coerce_toggle(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn descriptor() -> Value {
        json!({
            "task_id": 42,
            "prompt": "a lighthouse in a storm",
            "prompt_strength": 7.5,
            "steps": 30,
            "seed": 1234,
            "width": 640,
            "height": 512,
            "upscale": true,
            "fix_faces": false,
            "tileable": false,
        })
    }

    // -- construction --

    #[test]
    fn full_descriptor_builds() {
        let task = TaskRecord::from_descriptor(&descriptor()).unwrap();
        assert_eq!(task.task_id, 42);
        assert_eq!(task.prompt, "a lighthouse in a storm");
        assert_eq!(task.strength, 7.5);
        assert_eq!(task.steps, 30);
        assert_eq!(task.seed, 1234);
        assert_eq!((task.width, task.height), (640, 512));
        assert!(task.upscale);
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.gpu_slot, UNASSIGNED);
    }

    #[test]
    fn missing_prompt_is_integrity_error() {
        let err = TaskRecord::from_descriptor(&json!({"task_id": 1})).unwrap_err();
        assert_matches!(err, CoreError::Integrity(_));
    }

    #[test]
    fn missing_task_id_is_integrity_error() {
        let err = TaskRecord::from_descriptor(&json!({"prompt": "p"})).unwrap_err();
        assert_matches!(err, CoreError::Integrity(_));
    }

    #[test]
    fn non_integer_task_id_is_integrity_error() {
        let err =
            TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": "abc"})).unwrap_err();
        assert_matches!(err, CoreError::Integrity(_));
    }

    #[test]
    fn numeric_string_task_id_is_accepted() {
        let task = TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": "17"})).unwrap();
        assert_eq!(task.task_id, 17);
    }

    #[test]
    fn only_prompt_and_task_id_are_required() {
        let task = TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": 1})).unwrap();
        assert_eq!(task.strength, DEFAULT_STRENGTH);
        assert_eq!(task.steps, DEFAULT_STEPS);
        assert_eq!((task.width, task.height), (DEFAULT_DIMENSION, DEFAULT_DIMENSION));
    }

    // -- fail-open optional fields --

    #[test]
    fn bad_strength_falls_back() {
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "prompt_strength": "spicy"}),
        )
        .unwrap();
        assert_eq!(task.strength, DEFAULT_STRENGTH);
    }

    #[test]
    fn strength_clamps_to_bounds() {
        let high = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "prompt_strength": 99.0}),
        )
        .unwrap();
        assert_eq!(high.strength, STRENGTH_MAX);

        let low = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "prompt_strength": -3.0}),
        )
        .unwrap();
        assert_eq!(low.strength, STRENGTH_MIN);
    }

    #[test]
    fn bad_steps_falls_back() {
        for bad in [json!("many"), json!(-5), json!(0)] {
            let task =
                TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": 1, "steps": bad}))
                    .unwrap();
            assert_eq!(task.steps, DEFAULT_STEPS);
        }
    }

    #[test]
    fn invalid_seed_draws_random_in_range() {
        let task =
            TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": 1, "seed": "zzz"}))
                .unwrap();
        assert!((0..SEED_FALLBACK_RANGE).contains(&task.seed));
    }

    #[test]
    fn non_boolean_toggle_is_ignored() {
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "upscale": "yes", "fix_faces": 1}),
        )
        .unwrap();
        assert!(!task.upscale);
        assert!(!task.fix_faces);
    }

    #[test]
    fn empty_image_url_reads_as_none() {
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "input_image_url": ""}),
        )
        .unwrap();
        assert_eq!(task.input_image_url, None);
    }

    // -- dimension validation --

    #[test]
    fn dimensions_reset_atomically() {
        // One bad value resets both.
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "width": 640, "height": 500}),
        )
        .unwrap();
        assert_eq!((task.width, task.height), (DEFAULT_DIMENSION, DEFAULT_DIMENSION));
    }

    #[test]
    fn partial_dimensions_reset_both() {
        let task =
            TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": 1, "width": 640}))
                .unwrap();
        assert_eq!((task.width, task.height), (DEFAULT_DIMENSION, DEFAULT_DIMENSION));
    }

    #[test]
    fn negative_dimensions_reset_both() {
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "width": -64, "height": 128}),
        )
        .unwrap();
        assert_eq!((task.width, task.height), (DEFAULT_DIMENSION, DEFAULT_DIMENSION));
    }

    #[test]
    fn oversized_dimensions_reset_both() {
        // 2^32 is a positive multiple of 64 as i64 but does not fit
        // in u32; it must not truncate to 0.
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "width": 4_294_967_296i64, "height": 64}),
        )
        .unwrap();
        assert_eq!((task.width, task.height), (DEFAULT_DIMENSION, DEFAULT_DIMENSION));
    }

    #[test]
    fn oversized_steps_falls_back() {
        let task = TaskRecord::from_descriptor(
            &json!({"prompt": "p", "task_id": 1, "steps": 4_294_967_296i64}),
        )
        .unwrap();
        assert_eq!(task.steps, DEFAULT_STEPS);
    }

    #[test]
    fn valid_dimensions_always_hold_the_invariant() {
        for (w, h) in [(64, 64), (512, 512), (640, 1024), (500, 500), (0, 64)] {
            let task = TaskRecord::from_descriptor(
                &json!({"prompt": "p", "task_id": 1, "width": w, "height": h}),
            )
            .unwrap();
            assert_eq!(task.width % 64, 0);
            assert_eq!(task.height % 64, 0);
            assert!(task.width > 0 && task.height > 0);
        }
    }

    // -- readiness --

    #[test]
    fn fresh_task_is_ready() {
        assert!(TaskRecord::from_descriptor(&descriptor()).unwrap().ready());
    }

    #[test]
    fn empty_prompt_is_not_ready() {
        let task = TaskRecord::from_descriptor(&json!({"prompt": "", "task_id": 1})).unwrap();
        assert!(!task.ready());
    }

    #[test]
    fn negative_task_id_is_not_ready() {
        let task = TaskRecord::from_descriptor(&json!({"prompt": "p", "task_id": -1})).unwrap();
        assert!(!task.ready());
    }

    #[test]
    fn processing_task_is_not_ready() {
        let mut task = TaskRecord::from_descriptor(&descriptor()).unwrap();
        task.transition(TaskStatus::Processing).unwrap();
        assert!(!task.ready());
    }

    // -- state machine --

    #[test]
    fn legal_transitions() {
        assert!(TaskStatus::Idle.can_transition(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition(TaskStatus::Done));
        assert!(TaskStatus::Processing.can_transition(TaskStatus::Error));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [TaskStatus::Done, TaskStatus::Error] {
            assert!(terminal.is_terminal());
            for to in [
                TaskStatus::Idle,
                TaskStatus::Processing,
                TaskStatus::Done,
                TaskStatus::Error,
            ] {
                assert!(!terminal.can_transition(to));
            }
        }
    }

    #[test]
    fn idle_cannot_skip_to_done() {
        let mut task = TaskRecord::from_descriptor(&descriptor()).unwrap();
        assert_matches!(
            task.transition(TaskStatus::Done),
            Err(CoreError::Transition(_))
        );
        assert_eq!(task.status, TaskStatus::Idle);
    }

    #[test]
    fn wire_codes_match_the_server() {
        assert_eq!(TaskStatus::Idle.wire_code(), 0);
        assert_eq!(TaskStatus::Processing.wire_code(), 1);
        assert_eq!(TaskStatus::Done.wire_code(), 2);
        assert_eq!(TaskStatus::Error.wire_code(), 3);
    }

    // -- serialisation round trip for logging --

    #[test]
    fn record_serialises_with_validated_fields() {
        let task = TaskRecord::from_descriptor(&descriptor()).unwrap();
        let logged = serde_json::to_value(&task).unwrap();
        assert_eq!(logged["task_id"], 42);
        assert_eq!(logged["prompt"], "a lighthouse in a storm");
        assert_eq!(logged["steps"], 30);
        assert_eq!(logged["width"], 640);
        assert_eq!(logged["status"], "idle");
    }
}
