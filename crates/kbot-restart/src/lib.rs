#![cfg(unix)]

pub mod client;
pub mod error;

pub use client::RestartClient;
pub use error::{RestartError, Result};
