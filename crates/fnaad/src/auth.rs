//! Static credential store backing the PLAIN handshake.

use subtle::ConstantTimeEq;
use tracing::debug;

use fnaa_core::CredentialVerifier;

use crate::config::UserEntry;

/// Verifies PLAIN credentials against the `[[auth.users]]` table.
///
/// Passwords are compared in constant time. The authorization identity is
/// not consulted.
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    users: Vec<UserEntry>,
}

impl StaticVerifier {
    pub fn new(users: Vec<UserEntry>) -> Self {
        if users.is_empty() {
            debug!("no users configured, every AUTHENTICATE will fail");
        }
        Self { users }
    }
}

impl CredentialVerifier for StaticVerifier {
    fn verify(&self, _identity: &str, username: &str, password: &str) -> bool {
        self.users
            .iter()
            .filter(|u| u.username == username)
            .any(|u| bool::from(u.password.as_bytes().ct_eq(password.as_bytes())))
    }
}
