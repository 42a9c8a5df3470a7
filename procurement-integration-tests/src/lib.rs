//! Integration tests for the procurement engine
//!
//! This crate holds tests that drive the engine, the in-memory adapters and
//! the test tooling together.

// This is a test-only crate
#![cfg(test)]
