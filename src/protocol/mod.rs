//! Remote command protocol
//!
//! Envelope framing, payload types and the command model exchanged with
//! the orchestration server.

pub mod command;
pub mod envelope;
pub mod messages;

pub use command::{
    ActionKind, Command, ConditionKind, ElementSelector, FailurePolicy, Position, RawCommand,
    SelectorStrategy, TestStep, WaitCondition,
};
pub use envelope::{Envelope, MessageType};
