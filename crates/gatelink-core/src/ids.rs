//! Request id generation.
//!
//! Ids combine a process-wide monotonic counter with the generator's creation
//! time, so ids never repeat within a process and do not collide with ids
//! issued by an earlier process against the same gateway session.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates request ids of the form `<epoch-ms base36>-<seq>`.
#[derive(Debug)]
pub struct RequestIdGenerator {
    salt: String,
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator salted with the current time.
    pub fn new() -> Self {
        #[allow(clippy::cast_sign_loss)]
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::with_salt(to_base36(millis))
    }

    /// Create a generator with an explicit salt.
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Next unique id.
    pub fn next_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.salt)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
