// error.rs — the one error type shared across every module.
//
// A manual enum + Display impl rather than reaching for thiserror. Each
// variant says where in the pipeline the failure happened, which is
// what the retry policy and the handlers switch on.

use std::fmt;

#[derive(Debug, Clone)]
pub enum MirrorError {
    /// The coin isn't in the symbol registry or fails the allowlist.
    FilterSkip(String),
    /// Computed copy quantity was below the account's minimum.
    SizeSkip { computed: f64, minimum: f64 },
    /// Malformed or unreadable account configuration file.
    Config(String),
    /// Network/IO failure talking to the destination venue — retryable.
    VenueTransient(String),
    /// Venue responded with a rate-limit rejection — retryable with a
    /// longer backoff.
    VenueRateLimited(String),
    /// Venue rejected the request for a business reason (e.g. position
    /// already flat). Not retryable in general, but some codes are
    /// handled specially by the caller.
    VenueBusinessReject { code: String, message: String },
    /// Anything else: bookkeeping corruption, unreachable branches.
    Internal(String),
}

impl MirrorError {
    /// The venue's business-reject code meaning "there is no position
    /// to close" — surfaced by real venues when a close races a prior
    /// fill that already flattened the position.
    pub const POSITION_IS_ZERO: &'static str = "position_is_zero";

    pub fn is_position_is_zero(&self) -> bool {
        matches!(
            self,
            MirrorError::VenueBusinessReject { code, .. } if code == Self::POSITION_IS_ZERO
        )
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::FilterSkip(s) => write!(f, "filtered: {}", s),
            MirrorError::SizeSkip { computed, minimum } => {
                write!(f, "size below minimum: computed={} minimum={}", computed, minimum)
            }
            MirrorError::Config(s) => write!(f, "config error: {}", s),
            MirrorError::VenueTransient(s) => write!(f, "venue transient error: {}", s),
            MirrorError::VenueRateLimited(s) => write!(f, "venue rate limited: {}", s),
            MirrorError::VenueBusinessReject { code, message } => {
                write!(f, "venue rejected ({}): {}", code, message)
            }
            MirrorError::Internal(s) => write!(f, "internal error: {}", s),
        }
    }
}

impl std::error::Error for MirrorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_zero_is_recognized_only_for_that_code() {
        let e = MirrorError::VenueBusinessReject {
            code: MirrorError::POSITION_IS_ZERO.to_string(),
            message: "position is zero".to_string(),
        };
        assert!(e.is_position_is_zero());

        let other = MirrorError::VenueBusinessReject {
            code: "insufficient_margin".to_string(),
            message: "nope".to_string(),
        };
        assert!(!other.is_position_is_zero());
    }
}
