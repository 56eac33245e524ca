//! Pure domain logic for the easel worker client.
//!
//! This crate has zero internal dependencies and no I/O: the task
//! record and its state machine, the wire-descriptor conversion, the
//! weighted prompt parser, the generation progress tracker, and the
//! GPU slot pool all live here so they can be used (and tested)
//! without a server, a GPU, or a runtime.

pub mod error;
pub mod progress;
pub mod prompt;
pub mod slots;
pub mod task;

pub use error::CoreError;
