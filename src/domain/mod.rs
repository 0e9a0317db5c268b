//! Domain types: configuration and the wire frame model.

pub mod config;
pub mod frame;

pub use config::MultiplexConfig;
pub use frame::{Frame, FrameDecoder};
