//! Identilink Core - contact model, observations, views, config and errors

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use types::*;
