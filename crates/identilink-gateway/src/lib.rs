//! Identilink Gateway - HTTP surface for identity resolution

pub mod cli;
pub mod error;
pub mod request;
pub mod server;
pub mod telemetry;

pub use cli::ServeArgs;
pub use error::ApiError;
pub use request::{parse_identify, ValidationError};
pub use server::{open_store, router, serve, start_gateway, AppState};
pub use telemetry::init_tracing;
