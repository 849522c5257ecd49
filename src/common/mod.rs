//! Common utilities shared by the library and the console binary

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
