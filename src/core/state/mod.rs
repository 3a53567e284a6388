// src/core/state/mod.rs

//! Defines the central `ServerState` struct and all related state components.

mod core;

pub use core::ServerState;
