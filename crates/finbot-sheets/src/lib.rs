//! Google Sheets adapter.
//!
//! [`SheetsStore`] implements the core `TabularStore` port; each destination
//! is a tab of one spreadsheet. Requests authenticate through a
//! [`TokenSource`], normally a [`ServiceAccountTokenSource`].

pub mod auth;
pub mod client;

pub use auth::{ServiceAccountKey, ServiceAccountTokenSource, StaticToken, TokenSource};
pub use client::SheetsStore;
