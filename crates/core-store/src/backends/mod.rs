//! Backend implementations for RecordStore
//!
//! This module provides different storage backends:
//! - `sqlite`: SQLite-based backend (default, requires `sqlite` feature)
//! - `memory`: process-local map, always available

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
