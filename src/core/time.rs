//! Shared timestamp and identifier helpers.
//!
//! All persisted timestamps are unix-epoch seconds. Operations take `now` explicitly so
//! staleness and retention are decided against the caller's clock, not a hidden one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ulid::Ulid;

pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Current unix-epoch seconds.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A ULID whose timestamp component is `secs`, so ids sort by capture time.
pub fn ulid_at(secs: u64) -> Ulid {
    Ulid::from_datetime(UNIX_EPOCH + Duration::from_secs(secs))
}

/// `YYYY-MM-DD HH:MM` in UTC.
pub fn format_utc(secs: u64) -> String {
    let days = (secs / SECS_PER_DAY) as i64;
    let rem = secs % SECS_PER_DAY;
    let (y, m, d) = civil_from_days(days);
    format!("{:04}-{:02}-{:02} {:02}:{:02}", y, m, d, rem / 3600, (rem % 3600) / 60)
}

/// Compact human duration: `45s`, `12m`, `3h 5m`, `2d 4h`.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < SECS_PER_DAY {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / SECS_PER_DAY, (secs % SECS_PER_DAY) / 3600)
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
