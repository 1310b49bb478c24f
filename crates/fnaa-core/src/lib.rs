//! fnaa-core: shared protocol library for FNAA flow agents.
//!
//! Provides CRLF line framing, the reply grammar (`220`/`404`/DATA blocks),
//! command parsing, SASL PLAIN credentials, and the symmetric
//! [`ProtocolSession`] used by both the agent and its clients.

pub mod auth;
pub mod codec;
pub mod error;
pub mod framer;
pub mod messages;
pub mod session;
pub mod transport;

// Re-export commonly used items at crate root.
pub use auth::{CredentialVerifier, Credentials, Mechanism};
pub use codec::{Line, LineCodec};
pub use error::{FnaaError, FnaaResult};
pub use framer::LineFramer;
pub use messages::{Command, Reply, Response, STATUS_FAIL, STATUS_OK};
pub use session::{AuthOutcome, AuthState, ProtocolSession, Role};
pub use transport::{AsyncStream, BoxedStream};
