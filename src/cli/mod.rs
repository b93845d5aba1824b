//! Command handlers for the querysmith binary.

mod commands;
mod output;

pub use commands::*;
