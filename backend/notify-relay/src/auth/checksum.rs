/// Checksum authenticator for the connection handshake
///
/// A client proves its identity by presenting `md5(uid || timestamp || secret)`
/// as lowercase hex, where `||` is plain string concatenation of the decimal
/// forms. The issuer of these checksums lives outside this service, so the
/// digest is fixed by the wire protocol.
///
/// MD5 is kept for compatibility only. A future protocol version should move
/// to HMAC-SHA256 over the same fields.
use crate::websocket::messages::Handshake;
use crate::websocket::Uid;
use std::fmt;
use thiserror::Error;

/// Maximum age of a handshake timestamp (24 hours)
pub const REPLAY_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Why a handshake was rejected
///
/// The display strings are sent verbatim to clients inside the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("timestamp in initial sequence is too old or not presented")]
    Expired,

    #[error("checksum is invalid")]
    InvalidChecksum,
}

/// Lowercase hex digest a valid handshake must carry
pub fn expected_checksum(uid: Uid, timestamp: i64, secret: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}{}", uid, timestamp, secret)))
}

/// Validate a handshake against the shared secret and the replay window
///
/// Both the expiry check and the digest comparison always run, and the
/// comparison itself does not exit early, so response timing does not reveal
/// which of the two failed. Expiry wins when both fail.
pub fn validate(
    uid: Uid,
    timestamp: i64,
    checksum: &str,
    secret: &str,
    now: i64,
) -> Result<(), AuthError> {
    let expired = timestamp < now.saturating_sub(REPLAY_WINDOW_SECS);

    let expected = expected_checksum(uid, timestamp, secret);
    let provided = checksum.to_ascii_lowercase();
    let checksum_ok = constant_time_compare(expected.as_bytes(), provided.as_bytes());

    match (expired, checksum_ok) {
        (true, _) => Err(AuthError::Expired),
        (false, false) => Err(AuthError::InvalidChecksum),
        (false, true) => Ok(()),
    }
}

/// Compare two byte slices in time independent of where they differ
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

/// Holds the shared secret and checks handshakes against it
#[derive(Clone)]
pub struct ChecksumAuthenticator {
    secret: String,
}

impl ChecksumAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a parsed handshake, returning the proven identity
    pub fn verify(&self, handshake: &Handshake, now: i64) -> Result<Uid, AuthError> {
        validate(
            handshake.uid,
            handshake.timestamp,
            &handshake.checksum,
            &self.secret,
            now,
        )?;
        Ok(handshake.uid)
    }
}

impl fmt::Debug for ChecksumAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumAuthenticator")
            .field("secret", &"<redacted>")
            .finish()
    }
}
