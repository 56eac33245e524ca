//! The easel worker node: polls the coordination server for
//! image-generation jobs, runs them against local compute slots, and
//! reports results back.

pub mod board;
pub mod config;
pub mod generate;
pub mod gpu;
pub mod heartbeat;
pub mod scheduler;
pub mod scratch;
