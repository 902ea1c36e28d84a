//! Agent authentication primitives.
//!
//! Both channels share one construction: HMAC-SHA256 under the agent's
//! pre-shared secret, compared in constant time. Challenge tokens
//! authenticate control-channel logins; one-shot upload tokens authenticate
//! the HTTP data channels. Compromise of the shared secret therefore breaks
//! both channels equally; the deployment model provisions the secret
//! out-of-band and treats it as long-lived.

use dashmap::DashMap;
use drift_core::{CoreError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// How long issued challenges and one-shot tokens stay valid.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(60);

type HmacSha256 = Hmac<Sha256>;

/// Sign a payload under a shared secret.
#[must_use]
pub fn sign(secret: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// Verify a signature in constant time.
#[must_use]
pub fn verify(secret: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let expected = sign(secret, payload);
    if signature.len() != expected.len() {
        return false;
    }
    expected.ct_eq(signature).into()
}

/// Fresh 32-byte challenges scoped to a connection identifier.
pub struct ChallengeCache {
    inner: DashMap<String, ([u8; 32], Instant)>,
    ttl: Duration,
}

impl Default for ChallengeCache {
    fn default() -> Self {
        ChallengeCache {
            inner: DashMap::new(),
            ttl: CHALLENGE_TTL,
        }
    }
}

impl ChallengeCache {
    /// A cache with a custom expiry; tests shorten it.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        ChallengeCache {
            inner: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh challenge for a connection, replacing any prior one.
    pub fn issue(&self, connection_id: &str) -> Result<[u8; 32]> {
        let mut challenge = [0u8; 32];
        getrandom::getrandom(&mut challenge)
            .map_err(|_| CoreError::internal("random source unavailable"))?;
        self.inner
            .insert(connection_id.to_string(), (challenge, Instant::now()));
        Ok(challenge)
    }

    /// Take the challenge for a connection. One use; expired entries are
    /// gone.
    pub fn take(&self, connection_id: &str) -> Option<[u8; 32]> {
        let (_, (challenge, issued_at)) = self.inner.remove(connection_id)?;
        (issued_at.elapsed() <= self.ttl).then_some(challenge)
    }

    /// Drop expired entries; wired to the minute tick.
    pub fn sweep(&self) {
        self.inner
            .retain(|_, (_, issued_at)| issued_at.elapsed() <= self.ttl);
    }
}

/// One-shot 128-bit upload credentials.
///
/// An entry is removed on the first validation attempt regardless of
/// outcome; a replayed token never validates.
pub struct TokenCache {
    inner: DashMap<Uuid, (String, Instant)>,
    ttl: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        TokenCache {
            inner: DashMap::new(),
            ttl: CHALLENGE_TTL,
        }
    }
}

impl TokenCache {
    /// A cache with a custom expiry; tests shorten it.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        TokenCache {
            inner: DashMap::new(),
            ttl,
        }
    }

    /// Issue a token bound to an agent name.
    pub fn issue(&self, agent: &str) -> Uuid {
        let token = Uuid::new_v4();
        self.inner
            .insert(token, (agent.to_lowercase(), Instant::now()));
        token
    }

    /// Consume a token, returning the agent it was issued to.
    ///
    /// The entry is removed whether or not the caller's signature check
    /// subsequently passes.
    pub fn consume(&self, token: Uuid) -> Option<String> {
        let (_, (agent, issued_at)) = self.inner.remove(&token)?;
        (issued_at.elapsed() <= self.ttl).then_some(agent)
    }

    /// Drop expired entries; wired to the minute tick.
    pub fn sweep(&self) {
        self.inner
            .retain(|_, (_, issued_at)| issued_at.elapsed() <= self.ttl);
    }

    /// Number of live tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no tokens are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let secret = b"agent secret";
        let payload = b"challenge bytes";
        let signature = sign(secret, payload);

        assert!(verify(secret, payload, &signature));
        assert!(!verify(b"other secret", payload, &signature));
        assert!(!verify(secret, b"other payload", &signature));
        assert!(!verify(secret, payload, &signature[..16]));
    }

    #[test]
    fn test_challenge_single_use() {
        let cache = ChallengeCache::default();
        let challenge = cache.issue("conn-1").unwrap();

        assert_eq!(cache.take("conn-1"), Some(challenge));
        assert_eq!(cache.take("conn-1"), None);
    }

    #[test]
    fn test_challenge_reissue_replaces() {
        let cache = ChallengeCache::default();
        let first = cache.issue("conn-1").unwrap();
        let second = cache.issue("conn-1").unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.take("conn-1"), Some(second));
    }

    #[test]
    fn test_challenge_expiry() {
        let cache = ChallengeCache::with_ttl(Duration::from_millis(10));
        cache.issue("conn-1").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.take("conn-1"), None);
    }

    #[test]
    fn test_token_consumed_once() {
        let cache = TokenCache::default();
        let token = cache.issue("Basement");

        assert_eq!(cache.consume(token), Some("basement".to_string()));
        // Second attempt fails: the entry is already gone.
        assert_eq!(cache.consume(token), None);
    }

    #[test]
    fn test_token_expiry_and_sweep() {
        let cache = TokenCache::with_ttl(Duration::from_millis(10));
        let token = cache.issue("a");
        std::thread::sleep(Duration::from_millis(30));

        cache.sweep();
        assert!(cache.is_empty());
        assert_eq!(cache.consume(token), None);
    }
}
