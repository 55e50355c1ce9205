//! Transport to the orchestration server

pub mod connection;

pub use connection::{Connection, ConnectionEvent, ConnectionState, EnvelopeHandler};
