//! Process memory sampling for performance records.

use sysinfo::System;

/// Resident set size of the current process, in bytes. Returns 0 when
/// the platform refuses to answer — performance numbers degrade, the
/// workflow does not.
pub fn current_memory() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        return 0;
    }
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// Unix timestamp as float seconds — the snapshot wire format for all
/// lifecycle timestamps.
pub fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sample_is_nonzero_on_supported_platforms() {
        // A running test binary always has a resident set.
        assert!(current_memory() > 0);
    }

    #[test]
    fn unix_clock_moves_forward() {
        let a = now_unix();
        let b = now_unix();
        assert!(b >= a);
        assert!(a > 1_600_000_000.0);
    }
}
