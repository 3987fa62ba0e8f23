//! Shared test support and end-to-end tests.

pub mod fixtures;
