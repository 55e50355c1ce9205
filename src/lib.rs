//! testbridge - remote UI test agent
//!
//! Embeds in a host application, keeps a WebSocket connection to an
//! orchestration server and executes declarative UI commands (tap, swipe,
//! drag, wait, assert, text input, slider, screenshot) against the host's
//! element tree, reporting a result envelope for each.

pub mod agent;
pub mod cli;
pub mod commands;
pub mod common;
pub mod host;
pub mod interpreter;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use protocol::{Command, Envelope};
