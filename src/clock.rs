//! Monotonic millisecond clock (spec §4.B)
//!
//! No wall-clock dependency: the epoch is "process start", and all deltas
//! are computed with wrapping arithmetic so a `u32` tick counter can run
//! indefinitely without the caller having to think about rollover.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Initialize the clock epoch. Idempotent; call once at startup.
pub fn init() {
    START.get_or_init(Instant::now);
}

/// Milliseconds since `init()` was called, wrapped into a `u32`.
pub fn now_ms() -> u32 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u32
}

/// Wrap-safe `now - then`, in milliseconds.
pub fn elapsed_ms(then: u32) -> u32 {
    now_ms().wrapping_sub(then)
}

/// Wrap-safe `now >= deadline`.
pub fn has_passed(deadline: u32) -> bool {
    (now_ms().wrapping_sub(deadline) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_handles_wraparound() {
        let then = u32::MAX - 10;
        let now = 5u32;
        // simulate wraparound arithmetic directly, independent of wall time
        let delta = now.wrapping_sub(then);
        assert_eq!(delta, 16);
    }

    #[test]
    fn has_passed_handles_wraparound() {
        let deadline = u32::MAX - 2;
        let now = 3u32;
        let delta = (now.wrapping_sub(deadline)) as i32;
        assert!(delta >= 0);
    }
}
