//! Centralized configuration for the glue layer.
//!
//! Protocol constants are fixed by the wire format and must match the peer.
//! Timing knobs that a host may want to tune live in [`RetryPolicy`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Framing and buffering parameters of the com wire.
pub struct WireConfig;

impl WireConfig {
    /// "BSEm" in big-endian byte order.
    pub const MAGIC: u32 = 0x4253_456d;
    /// magic + total_length + type + request_id
    pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4;
    pub const MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;
    pub const READ_CHUNK_SIZE: usize = 8192;
    pub const DEFAULT_IDENT: &'static str = "sfi-wire";
}

/// Glue context parameters.
pub struct GlueConfig;

impl GlueConfig {
    /// Poll interval used by round-trip waits between I/O pumps.
    pub const ROUND_TRIP_POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const FIRST_HOOK_ID: u64 = 1;
}

/// Child process parameters for `spawn_async`.
pub struct SpawnConfig;

impl SpawnConfig {
    /// Nice level applied to the child before exec.
    pub const CHILD_PRIORITY: i32 = 0;
}

/// Retry behaviour for [`crate::wire::ComWire::ping_pong`].
///
/// The total budget is `timeout`, split evenly across `attempts` polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 4 }
    }
}

impl RetryPolicy {
    /// Create a policy with the given number of attempts (at least one).
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    /// Time to wait per attempt given the overall budget.
    pub fn slice(&self, timeout: Duration) -> Duration {
        timeout / self.attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_spells_bsem() {
        assert_eq!(&WireConfig::MAGIC.to_be_bytes(), b"BSEm");
    }

    #[test]
    fn test_retry_policy_slices_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 4);
        assert_eq!(
            policy.slice(Duration::from_millis(400)),
            Duration::from_millis(100)
        );
        assert_eq!(RetryPolicy::with_attempts(0).attempts, 1);
    }

    #[test]
    fn test_retry_policy_from_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"attempts":2}"#).unwrap();
        assert_eq!(policy, RetryPolicy::with_attempts(2));
    }
}
