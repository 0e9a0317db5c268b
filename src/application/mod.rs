//! Application layer: interpretation of administrative commands.

pub mod commands;
