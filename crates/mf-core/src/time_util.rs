//! Wall-clock timestamps.
//!
//! Uses `clock_gettime(CLOCK_REALTIME)` on Linux and `SystemTime` elsewhere.
//! Elapsed-time measurements (emission cadence, fan-out latency) use
//! `std::time::Instant` / `tokio::time::Instant` instead.

#[cfg(not(target_os = "linux"))]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(target_os = "linux")]
#[inline]
fn clock_realtime() -> (u64, u64) {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: CLOCK_REALTIME is always valid. On failure the zeroed ts is a
    // safe fallback (epoch).
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    (ts.tv_sec as u64, ts.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn clock_realtime() -> (u64, u64) {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_secs(), d.subsec_nanos() as u64)
}

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    let (sec, nsec) = clock_realtime();
    sec * 1_000 + nsec / 1_000_000
}

/// Current time as fractional **seconds** since Unix epoch (order timestamps).
#[inline]
pub fn now_secs_f64() -> f64 {
    let (sec, nsec) = clock_realtime();
    sec as f64 + nsec as f64 / 1e9
}
