//! Convenient re-exports for common usage.
//!
//! This module provides a "prelude" that re-exports the most commonly used types
//! from `cmd-uplink`, allowing you to import them all at once.
//!
//! # Usage
//!
//! ```rust
//! use cmd_uplink::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Session types**: [`UplinkSession`], [`SessionBuilder`]
//! - **Core traits**: [`Transport`]
//! - **Transports**: [`RecordingTransport`], [`ChaosTransport`]
//! - **Input**: [`Action`], [`KeyEvent`], [`Release`], [`SourceId`], [`AnalogState`]
//! - **Fundamental types**: [`Command`], [`CommandNumber`], [`Sequence`], [`ServerFrame`], [`Timestamp`]
//! - **Session state**: [`ConnectionState`], [`InputFocus`], [`PeerProtocol`]
//! - **Results**: [`TransmitOutcome`], [`UplinkStats`], [`UplinkError`]
//! - **Configuration**: [`TransmitConfig`], [`MoveConfig`], [`PointerConfig`], [`AnalogConfig`]
//!
//! # Example
//!
//! ```rust
//! use cmd_uplink::prelude::*;
//!
//! let mut session = SessionBuilder::new().start_session(RecordingTransport::new())?;
//! session.connect();
//! session.set_connection_state(ConnectionState::Active);
//!
//! let now = Timestamp::from_millis(1_000);
//! session.key_down(Action::Forward, KeyEvent::new(SourceId::new(87)), now)?;
//! let outcome = session.run_frame(16, now)?;
//! assert!(outcome.reached_transport());
//! # Ok::<(), UplinkError>(())
//! ```

// Core session types
pub use crate::sessions::builder::SessionBuilder;
pub use crate::sessions::uplink_session::UplinkSession;

// Core traits
pub use crate::Transport;

// Transports
pub use crate::network::chaos_transport::{ChaosConfig, ChaosTransport};
pub use crate::network::loopback::RecordingTransport;

// Input
pub use crate::assembler::AnalogState;
pub use crate::buttons::{Action, KeyEvent, Release, SourceId};

// Fundamental types
pub use crate::command::Command;
pub use crate::{CommandNumber, Sequence, ServerFrame, Timestamp};

// Session state types
pub use crate::{ConnectionState, InputFocus, PeerProtocol};

// Results and errors
pub use crate::network::network_stats::UplinkStats;
pub use crate::network::transmitter::TransmitOutcome;
pub use crate::UplinkError;

// Common configuration types
pub use crate::sessions::config::{AnalogConfig, MoveConfig, PointerConfig, TransmitConfig};
