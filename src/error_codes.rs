//! Failure categories reported by document store backends.
//!
//! These kinds serialize using `SCREAMING_SNAKE_CASE` so a backend that
//! reports failures as JSON (e.g. a REST or streaming gateway) can map them
//! without a translation table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a document store operation failed.
///
/// Every kind is non-fatal: the failed attempt is abandoned and the session
/// keeps its prior local state until the next snapshot re-synchronizes it.
///
/// Use [`description()`](StoreErrorKind::description) for a human-readable
/// explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreErrorKind {
    /// The request could not reach the store (offline, DNS, dropped socket).
    Network,
    /// The store rejected the request (security rules, expired credentials).
    PermissionDenied,
    /// The store is reachable but temporarily not serving requests.
    Unavailable,
    /// The store failed internally or returned something unexpected.
    Internal,
}

impl StoreErrorKind {
    /// Returns a human-readable description of this failure kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "The document store could not be reached. Check your connection.",
            Self::PermissionDenied => {
                "The document store rejected the request. The room may be protected."
            }
            Self::Unavailable => {
                "The document store is temporarily unavailable. Please try again in a moment."
            }
            Self::Internal => "The document store failed while processing the request.",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_screaming_snake_case_on_the_wire() {
        let json = serde_json::to_string(&StoreErrorKind::PermissionDenied).unwrap();
        assert_eq!(json, "\"PERMISSION_DENIED\"");
        let back: StoreErrorKind = serde_json::from_str("\"NETWORK\"").unwrap();
        assert_eq!(back, StoreErrorKind::Network);
    }

    #[test]
    fn display_uses_description() {
        let kind = StoreErrorKind::Unavailable;
        assert_eq!(kind.to_string(), kind.description());
    }
}
