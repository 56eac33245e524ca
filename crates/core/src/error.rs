#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A job descriptor is missing a field without which the task can
    /// never be traced back to the server (prompt, task_id).
    #[error("Descriptor integrity error: {0}")]
    Integrity(String),

    #[error("Invalid state transition: {0}")]
    Transition(String),
}
