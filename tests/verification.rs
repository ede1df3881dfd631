//! Verification integration tests.
//!
//! Property-based tests with proptest over button tracking, the wire codecs and the
//! transmit/receive pair.

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Verification test modules
mod verification {
    pub mod property;
}
