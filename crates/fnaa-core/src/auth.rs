//! SASL PLAIN credentials for the FNAA handshake.
//!
//! The client sends a single base64 token decoding to
//! `identity \0 username \0 password`, where `identity` may be empty.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{FnaaError, FnaaResult};

/// Authentication mechanisms the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
}

impl Mechanism {
    /// Parse a mechanism name (case-insensitive).
    pub fn parse(name: &str) -> FnaaResult<Self> {
        if name.eq_ignore_ascii_case("plain") {
            Ok(Mechanism::Plain)
        } else {
            Err(FnaaError::UnsupportedMechanism(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
        }
    }
}

/// Decoded PLAIN credentials. Transient: dropped right after verification.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: String::new(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Encode as a PLAIN token (base64 of `identity\0username\0password`).
    pub fn encode_plain(&self) -> String {
        let raw = format!("{}\0{}\0{}", self.identity, self.username, self.password);
        STANDARD.encode(raw.as_bytes())
    }

    /// Decode a PLAIN token.
    pub fn decode_plain(token: &str) -> FnaaResult<Self> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| FnaaError::AuthFailed(format!("invalid base64 token: {e}")))?;
        let text = String::from_utf8(raw)
            .map_err(|_| FnaaError::AuthFailed("token is not UTF-8".into()))?;

        let parts: Vec<&str> = text.split('\0').collect();
        match parts.as_slice() {
            [identity, username, password] if !username.is_empty() => Ok(Self {
                identity: identity.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            }),
            [_, _, _] => Err(FnaaError::AuthFailed("empty username".into())),
            _ => Err(FnaaError::AuthFailed(format!(
                "expected 3 NUL-separated fields, got {}",
                parts.len()
            ))),
        }
    }
}

/// Decides whether a set of credentials is allowed in.
///
/// Implementations are pure: no I/O, no session mutation.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identity: &str, username: &str, password: &str) -> bool;
}

impl<F> CredentialVerifier for F
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    fn verify(&self, identity: &str, username: &str, password: &str) -> bool {
        self(identity, username, password)
    }
}
