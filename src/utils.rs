//! Miscellaneous helper utilities.
use std::time::{SystemTime, UNIX_EPOCH};

use rsa::rand_core::{OsRng, RngCore};

/// Current unix time in seconds, or 0 if the clock is before the epoch.
#[must_use]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Fill a fresh buffer with `len` bytes from the OS RNG.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[must_use]
pub fn random_u32() -> u32 {
    OsRng.next_u32()
}
