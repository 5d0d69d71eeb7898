//! Run tracker library
//!
//! Exposes modules for integration testing and embedding the engine.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
