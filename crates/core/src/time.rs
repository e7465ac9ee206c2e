//! Wall-clock timestamps recorded on runs and probe results.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
pub type EpochMs = i64;

pub fn now_ms() -> EpochMs {
    to_epoch_ms(SystemTime::now())
}

/// Clock readings before the epoch clamp to 0.
pub fn to_epoch_ms(at: SystemTime) -> EpochMs {
    let since = at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    EpochMs::try_from(since.as_millis()).unwrap_or(EpochMs::MAX)
}
