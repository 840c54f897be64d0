//! Testing utilities for mysql-mirror
//!
//! An in-memory database for fast tests and Docker container management for
//! tests against a real MySQL server.

pub mod container;
pub mod memory;

pub use container::MySQLContainer;
pub use memory::MemoryDatabase;
