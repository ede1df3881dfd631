//! Network integration tests.
//!
//! Loss tolerance of single and batched frames, using `ChaosTransport` to drop sends.

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Network test modules
mod network {
    pub mod resilience;
}
