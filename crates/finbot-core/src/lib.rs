//! Core of the finance relay bot.
//!
//! Framework-agnostic: the messenger, the classifier and the tabular store
//! live behind ports (traits) implemented in adapter crates. This crate owns
//! the pipeline that ties them together.

pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod persistence;
pub mod pipeline;
pub mod retry;

pub use errors::{Error, Result};
