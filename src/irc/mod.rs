//! IRC session engine: wire codec, transport, paced outbound queue and the
//! connection lifecycle.

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod queue;
pub mod session;
