//! Session integration tests.
//!
//! Drives [`UplinkSession`](cmd_uplink::UplinkSession) end to end: input in, frames out,
//! decoded by a [`CommandReceiver`](cmd_uplink::CommandReceiver).

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Session test modules
mod sessions {
    pub mod lifecycle;
    pub mod uplink;
}
