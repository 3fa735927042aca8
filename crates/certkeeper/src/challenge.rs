//! HTTP-01 challenge state shared between the ACME exchange and the responder.
//!
//! The exchange publishes proofs through [`ChallengeHooks`]; the responder
//! serves them by exact request-path lookup.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

/// Well-known path prefix for HTTP-01 validation, without the leading slash
pub const CHALLENGE_PATH_PREFIX: &str = ".well-known/acme-challenge/";

/// Publish and withdraw HTTP-01 proofs.
///
/// Implemented by [`ChallengeMap`] and invoked by the protocol exchange as
/// the validation authority offers and retires challenges. The map stays the
/// single source of truth for what the responder serves.
pub trait ChallengeHooks: Send + Sync {
    /// Make the proof for `token` available at its well-known path
    fn offer(&self, token: &str, proof: &str);

    /// Retire a validated or expired challenge
    fn withdraw(&self, token: &str);
}

/// Pending validation proofs, keyed by leading-slash-stripped request path.
///
/// Live only for the duration of one acquisition attempt.
///
/// # Thread Safety
///
/// Uses `DashMap` so the responder can look up proofs while the exchange
/// inserts and removes them.
#[derive(Debug)]
pub struct ChallengeMap {
    /// Map of validation path -> proof value
    entries: Arc<DashMap<String, String>>,
}

impl ChallengeMap {
    /// Create an empty challenge map
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Well-known validation path for a challenge token
    pub fn challenge_path(token: &str) -> String {
        format!("{CHALLENGE_PATH_PREFIX}{token}")
    }

    /// Proof value for an exact request path (already stripped of its
    /// leading slash), or `None` for any other path.
    pub fn response_for(&self, path: &str) -> Option<String> {
        let result = self.entries.get(path).map(|v| v.clone());
        if result.is_some() {
            trace!(path = %path, "challenge path found");
        } else {
            trace!(path = %path, "challenge path not found");
        }
        result
    }

    /// Number of challenges currently offered
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop all offered challenges
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            debug!(cleared = count, "cleared pending challenges");
        }
    }
}

impl ChallengeHooks for ChallengeMap {
    fn offer(&self, token: &str, proof: &str) {
        debug!(token = %token, "offering http-01 challenge");
        self.entries
            .insert(Self::challenge_path(token), proof.to_string());
    }

    fn withdraw(&self, token: &str) {
        if self.entries.remove(&Self::challenge_path(token)).is_some() {
            debug!(token = %token, "withdrew http-01 challenge");
        }
    }
}

impl Default for ChallengeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ChallengeMap {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_and_lookup() {
        let map = ChallengeMap::new();

        map.offer("test-token", "test-proof");

        let response = map.response_for(".well-known/acme-challenge/test-token");
        assert_eq!(response, Some("test-proof".to_string()));
    }

    #[test]
    fn test_lookup_misses() {
        let map = ChallengeMap::new();
        map.offer("test-token", "test-proof");

        // Unknown path
        assert_eq!(map.response_for("other/path"), None);

        // Trailing content on an otherwise matching path
        assert_eq!(
            map.response_for(".well-known/acme-challenge/test-tokenx"),
            None
        );

        // Bare prefix
        assert_eq!(map.response_for(".well-known/acme-challenge/"), None);
    }

    #[test]
    fn test_withdraw() {
        let map = ChallengeMap::new();

        map.offer("test-token", "test-proof");
        assert_eq!(map.pending_count(), 1);

        map.withdraw("test-token");
        assert_eq!(map.pending_count(), 0);
        assert_eq!(
            map.response_for(".well-known/acme-challenge/test-token"),
            None
        );
    }

    #[test]
    fn test_clear() {
        let map = ChallengeMap::new();

        map.offer("token1", "proof1");
        map.offer("token2", "proof2");
        assert_eq!(map.pending_count(), 2);

        map.clear();
        assert_eq!(map.pending_count(), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let map1 = ChallengeMap::new();
        let map2 = map1.clone();

        map1.offer("token", "proof");

        assert_eq!(
            map2.response_for(".well-known/acme-challenge/token"),
            Some("proof".to_string())
        );
    }
}
