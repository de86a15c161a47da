//! # Relay Configuration & Constants
//!
//! Every magic number in the relay lives here. Timeouts, retry ceilings,
//! explorer links, price feed endpoints. If you're hardcoding a constant
//! somewhere else, move it here.
//!
//! Constants are the defaults; [`RelayConfig`] carries the values a running
//! node actually uses, so tests and operators can shrink or stretch them
//! without recompiling.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Relay wire protocol version. Bumped when envelope shapes change.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Session Timing
// ---------------------------------------------------------------------------

/// How long a freshly created session waits for a client to join before it
/// expires. Applied uniformly to every session.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// How long expired and finished sessions stay around as tombstones.
/// Long enough that a late `joinSession` gets `expired` instead of
/// `sessionNotFound`, short enough that memory stays bounded.
pub const SESSION_RETENTION: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Hard ceiling on broadcast attempts for one payload.
pub const MAX_BROADCAST_ATTEMPTS: u32 = 5;

/// Backoff before the second broadcast attempt. Doubles every attempt.
pub const INITIAL_BROADCAST_BACKOFF: Duration = Duration::from_millis(250);

/// Backoff never grows beyond this.
pub const MAX_BROADCAST_BACKOFF: Duration = Duration::from_secs(4);

/// How long we wait for the ledger to confirm a broadcast transaction.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between confirmation status polls.
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Explorer base URL. The submission signature is appended verbatim.
pub const DEFAULT_EXPLORER_BASE_URL: &str = "https://solscan.io/tx/";

// ---------------------------------------------------------------------------
// WebSocket Close Codes
// ---------------------------------------------------------------------------

/// RFC 6455 "protocol error". Sent when an envelope can't be parsed or
/// breaks the protocol rules.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// RFC 6455 "going away". Sent to every connection on shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Application code: the referenced session does not exist.
pub const CLOSE_SESSION_NOT_FOUND: u16 = 4404;

/// Application code: the referenced session expired before anyone joined.
pub const CLOSE_SESSION_EXPIRED: u16 = 4410;

// ---------------------------------------------------------------------------
// Price Feed
// ---------------------------------------------------------------------------

/// Bluelytics endpoint for the informal ("blue") ARS/USD rate.
pub const BLUELYTICS_URL: &str = "https://api.bluelytics.com.ar/v2/latest";

/// Upper bound on a price feed request.
pub const PRICE_FEED_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Payment QR Codes
// ---------------------------------------------------------------------------

/// Smallest edge, in pixels, of a rendered payment QR code.
pub const QR_MIN_SIZE: u32 = 300;

/// Timestamp format stamped into QR payloads, in the merchant's local time.
pub const QR_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Tunables for a running relay.
///
/// Defaults mirror the constants above. Tests shrink the timings so the
/// whole lifecycle fits in a paused-clock test.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Time a session may sit in `Created` before it expires.
    pub session_timeout: Duration,

    /// Time a terminal session is kept before it is purged.
    pub retention: Duration,

    /// When true, a request that references an unknown or expired session
    /// closes the connection (4404 / 4410) after the error envelope.
    pub close_on_invalid_session: bool,

    /// Retry and confirmation policy for the submission adapter.
    pub submission: SubmissionPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_timeout: SESSION_TIMEOUT,
            retention: SESSION_RETENTION,
            close_on_invalid_session: false,
            submission: SubmissionPolicy::default(),
        }
    }
}

/// Broadcast retry and confirmation bounds.
#[derive(Debug, Clone)]
pub struct SubmissionPolicy {
    /// Total broadcast attempts, including the first one.
    pub max_broadcast_attempts: u32,

    /// Sleep before the first retry.
    pub initial_backoff: Duration,

    /// Cap on the exponential backoff.
    pub max_backoff: Duration,

    /// Upper bound on waiting for confirmation.
    pub confirmation_timeout: Duration,

    /// Poll interval while waiting for confirmation.
    pub poll_interval: Duration,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_broadcast_attempts: MAX_BROADCAST_ATTEMPTS,
            initial_backoff: INITIAL_BROADCAST_BACKOFF,
            max_backoff: MAX_BROADCAST_BACKOFF,
            confirmation_timeout: CONFIRMATION_TIMEOUT,
            poll_interval: CONFIRMATION_POLL_INTERVAL,
        }
    }
}

impl SubmissionPolicy {
    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_constants_sanity() {
        // A tombstone that outlives nothing would turn late joins into
        // `sessionNotFound`.
        assert!(SESSION_TIMEOUT < SESSION_RETENTION);
        assert!(CONFIRMATION_POLL_INTERVAL < CONFIRMATION_TIMEOUT);
        assert!(INITIAL_BROADCAST_BACKOFF < MAX_BROADCAST_BACKOFF);
    }

    #[test]
    fn test_close_codes_are_distinct() {
        let codes = [
            CLOSE_PROTOCOL_ERROR,
            CLOSE_GOING_AWAY,
            CLOSE_SESSION_NOT_FOUND,
            CLOSE_SESSION_EXPIRED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // Application codes must live in the private-use range.
        assert!((4000..5000).contains(&CLOSE_SESSION_NOT_FOUND));
        assert!((4000..5000).contains(&CLOSE_SESSION_EXPIRED));
    }

    #[test]
    fn test_default_config_matches_constants() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.session_timeout, SESSION_TIMEOUT);
        assert_eq!(cfg.retention, SESSION_RETENTION);
        assert!(!cfg.close_on_invalid_session);
        assert_eq!(cfg.submission.max_broadcast_attempts, MAX_BROADCAST_ATTEMPTS);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = SubmissionPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(10), MAX_BROADCAST_BACKOFF);
        assert_eq!(policy.backoff_for(u32::MAX), MAX_BROADCAST_BACKOFF);
    }
}
