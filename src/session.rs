//! Signed session cookies.
//!
//! Cookie value: `uid-expiry-signature`, where the signature is the hex
//! SHA-256 of `uid-passwd_hash-expiry-secret`. Stateless: the server stores
//! nothing, tampering with any component breaks the recomputed signature,
//! and changing the password invalidates every outstanding cookie for that
//! user. Validation never errors — anything malformed resolves to anonymous.

use sha2::{Digest, Sha256};

use crate::models::User;

/// Session cookie name.
pub const COOKIE_NAME: &str = "awesession";

/// Default session lifetime, one day.
pub const MAX_AGE_SECS: u64 = 86400;

/// The three dash-joined components of a cookie value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieParts<'a> {
    pub uid: &'a str,
    pub expires: u64,
    pub sig: &'a str,
}

/// Splits a cookie value into its components. Exactly three parts with a
/// numeric expiry, or nothing.
pub fn parse(cookie: &str) -> Option<CookieParts<'_>> {
    let mut it = cookie.split('-');
    let (uid, expires, sig) = (it.next()?, it.next()?, it.next()?);
    if it.next().is_some() || uid.is_empty() || sig.is_empty() {
        return None;
    }
    let expires: u64 = expires.parse().ok()?;
    Some(CookieParts { uid, expires, sig })
}

/// Issues and checks cookie signatures for one server secret.
#[derive(Clone)]
pub struct Sessions {
    secret: String,
}

impl Sessions {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn signature(&self, uid: &str, passwd: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{uid}-{passwd}-{expires}-{}", self.secret));
        hex::encode(hasher.finalize())
    }

    /// Builds a cookie value for `user` valid for `max_age` seconds.
    pub fn issue(&self, user: &User, max_age: u64) -> String {
        let expires = epoch_secs() + max_age;
        let sig = self.signature(user.id(), &user.passwd, expires);
        format!("{}-{expires}-{sig}", user.id())
    }

    /// Checks parsed components against the stored password hash at time
    /// `now`. Pure: same inputs, same verdict.
    pub fn validate(&self, parts: &CookieParts<'_>, passwd: &str, now: u64) -> bool {
        if parts.expires < now {
            return false;
        }
        let expected = self.signature(parts.uid, passwd, parts.expires);
        constant_time_eq(expected.as_bytes(), parts.sig.as_bytes())
    }
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Byte comparison whose duration does not depend on where the inputs
/// diverge.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
