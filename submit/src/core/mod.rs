//! Deterministic, pure logic shared by the submission pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod message;
pub mod naming;
pub mod policy;
pub mod types;
