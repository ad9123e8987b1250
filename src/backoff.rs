use std::time::Duration;

/// Exponential backoff step: double the current delay, capped.
pub fn next_delay(current: Duration, cap: Duration) -> Duration {
    (current * 2).min(cap)
}
