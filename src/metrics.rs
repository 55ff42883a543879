//! Timing instrumentation for pipeline stages.
//!
//! A thin wrapper over `tracing` so stage durations show up alongside the
//! rest of the diagnostic output without a separate metrics backend.

use std::time::Instant;

/// Run `f`, recording its wall-clock duration under `stage`.
pub fn timed<T>(stage: &str, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    tracing::debug!(
        stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage timing"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_passes_through_result() {
        let value = timed("test_stage", || 41 + 1);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_timed_passes_through_errors() {
        let result: Result<(), &str> = timed("failing_stage", || Err("boom"));
        assert_eq!(result, Err("boom"));
    }
}
