//! Byte-stream abstraction shared by the inbound and outbound roles.
//!
//! TCP sockets, in-memory duplex pipes and anything else that is
//! `AsyncRead + AsyncWrite` can carry an FNAA session.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream usable as a session transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased stream, so handlers do not need to be generic over the socket.
pub type BoxedStream = Box<dyn AsyncStream>;
