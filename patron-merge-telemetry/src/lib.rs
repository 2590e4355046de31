//! Tracing setup shared by the job binary and tests.

pub mod tracing;
