//! Infrastructure: the connection registries, per-connection handlers, and
//! the multiplexer server itself.

pub mod handler;
pub mod registry;
pub mod server;

pub use registry::{ConnId, Registry};
pub use server::{Endpoints, MultiplexError, MultiplexHandle, Multiplexer};
