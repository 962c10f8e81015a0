//! Shared types for the `castellan` TLS context manager: address/codec
//! utilities (component A), the configuration model and loader
//! (component B), the error taxonomy, and ambient logging support.

pub mod addr;
pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::CastellanError;
