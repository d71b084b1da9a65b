//! Shared error definitions and small parsing utilities used across cadence crates.

pub mod duration;
pub mod error;

pub use error::{Error, FromMessage, Result};
