//! Transport-facing abstractions: the inbound event model and the reply port.

pub mod port;
pub mod types;
