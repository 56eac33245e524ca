//! NVML-based GPU detection.
//!
//! Initialisation is gracefully optional: a host without NVIDIA
//! drivers reports zero devices instead of panicking, and the caller
//! falls back to the single CPU slot.

use nvml_wrapper::Nvml;

/// Number of GPUs visible on this host, or 0 when NVML is unavailable.
pub fn detect_gpu_count() -> u32 {
    let nvml = match Nvml::init() {
        Ok(nvml) => nvml,
        Err(e) => {
            tracing::warn!(error = %e, "NVML unavailable, no GPUs detected");
            return 0;
        }
    };
    match nvml.device_count() {
        Ok(count) => {
            tracing::info!(gpu_count = count, "GPU detection complete");
            count
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to query GPU device count");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Must not panic on hosts without NVIDIA drivers (typical CI).
    #[test]
    fn detection_never_panics() {
        let _count = detect_gpu_count();
    }
}
