//! HTTP basic authentication for tenant content and the admin API

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::header::{HeaderMap, AUTHORIZATION};
use sha1::{Digest, Sha1};
use std::sync::Arc;

/// Prefix marking a base64 SHA-1 digest
const SHA_PREFIX: &str = "{SHA}";

/// Source of expected secrets for basic auth.
///
/// Returns the expected digest for `username` in `realm`, in the form
/// produced by [`sha_digest`], or `None` if the user is unknown.
pub trait CredentialChecker: Send + Sync {
    fn expected_digest(&self, username: &str, realm: &str) -> Option<String>;
}

/// `{SHA}` + base64(sha1(password))
pub fn sha_digest(password: &str) -> String {
    let sum = Sha1::digest(password.as_bytes());
    format!("{SHA_PREFIX}{}", STANDARD.encode(sum))
}

/// A single username/password pair
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    digest: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            digest: sha_digest(password),
        }
    }
}

impl CredentialChecker for StaticCredentials {
    fn expected_digest(&self, username: &str, _realm: &str) -> Option<String> {
        if username == self.username {
            Some(self.digest.clone())
        } else {
            None
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Basic-auth gate for one realm
#[derive(Clone)]
pub struct BasicAuth {
    realm: String,
    checker: Arc<dyn CredentialChecker>,
}

impl BasicAuth {
    pub fn new(realm: impl Into<String>, checker: Arc<dyn CredentialChecker>) -> Self {
        Self {
            realm: realm.into(),
            checker,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Value for the `WWW-Authenticate` challenge header
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm.replace('"', ""))
    }

    /// Whether the request carries valid credentials for this realm
    pub fn check(&self, headers: &HeaderMap) -> bool {
        let Some((username, password)) = parse_basic(headers) else {
            return false;
        };
        let Some(expected) = self.checker.expected_digest(&username, &self.realm) else {
            return false;
        };
        constant_time_compare(&expected, &sha_digest(&password))
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Decode `Authorization: Basic <base64(user:pass)>`
fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
