//! # sandboxd Config
//!
//! Configuration management for the browser sandbox supervisor.
//!
//! A sandbox is described by one TOML document: the virtual display geometry,
//! the managed processes and their dependency edges, the externally exposed
//! endpoints, restart policy and logging. Everything has a default, so an
//! empty file yields the standard display / window manager / VNC / browser
//! topology.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
